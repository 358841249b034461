//! Timestamp formatting and parsing for the ledger file.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use thiserror::Error;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Errors that can occur during timestamp parsing.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// The timestamp string is empty.
    #[error("Empty timestamp string")]
    EmptyString,

    /// The timestamp value is invalid.
    #[error("Invalid timestamp: {0}")]
    InvalidFormat(String),
}

/// Formats a timestamp as ISO 8601 string.
///
/// The format is `YYYY-MM-DDTHH:MM:SS.ffffff+00:00`.
///
/// # Examples
///
/// ```
/// use callpipe::utils::{format_iso8601, parse_timestamp};
///
/// let ts = parse_timestamp("2024-03-01T09:30:00Z").unwrap();
/// assert_eq!(format_iso8601(&ts), "2024-03-01T09:30:00.000000+00:00");
/// ```
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Formats the day of a timestamp as `YYYY-MM-DD`.
#[must_use]
pub fn format_date(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Drops sub-microsecond precision so the value survives a format/parse
/// round trip unchanged.
#[must_use]
pub fn truncate_to_micros(dt: Timestamp) -> Timestamp {
    dt.trunc_subsecs(6)
}

/// Parses a ledger timestamp.
///
/// Accepts RFC 3339 with an offset or `Z`, and the naive ISO forms written
/// by older ledger files (no offset, interpreted as UTC).
///
/// # Errors
///
/// Returns `TimestampError` if the input cannot be parsed.
pub fn parse_timestamp(input: &str) -> Result<Timestamp, TimestampError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(TimestampError::EmptyString);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)));
    }

    Err(TimestampError::InvalidFormat(trimmed.to_string()))
}

/// Serde adapter writing timestamps in the ledger's ISO 8601 form.
///
/// Use with `#[serde(with = "crate::utils::timestamps::serde_iso")]`.
pub mod serde_iso {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::{format_iso8601, parse_timestamp, Timestamp};

    /// Serializes a timestamp.
    pub fn serialize<S: Serializer>(value: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_iso8601(value))
    }

    /// Deserializes a timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(D::Error::custom)
    }
}
