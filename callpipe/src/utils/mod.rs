//! Utilities for timestamps, time sources, and input validation.

mod clock;
pub mod timestamps;
pub mod validation;

#[cfg(test)]
pub use clock::MockClock;
pub use clock::{Clock, FixedClock, SystemClock};
pub use timestamps::{
    format_date, format_iso8601, parse_timestamp, truncate_to_micros, Timestamp, TimestampError,
};
pub use validation::{validate_attributes, validate_item_id};
