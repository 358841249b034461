//! Core domain model for the pipeline ledger.
//!
//! This module contains the types the state store persists:
//! - Stage names and entry status
//! - Stage entries and per-stage ledgers
//! - Archive records and the pipeline state aggregate

mod archive_record;
mod entry;
mod ledger;
mod stage;
mod state;
mod status;

pub use archive_record::{ArchiveCategory, ArchiveRecord, UnknownCategoryError};
pub use entry::{Attributes, StageEntry, RESERVED_ATTRIBUTES};
pub use ledger::{CounterCheck, ParsedLedger, StageLedger};
pub use stage::{StageName, UnknownStageError};
pub use state::{DateRange, ExtractionLog, LoadedState, PipelineState, SCHEMA_VERSION};
pub use status::EntryStatus;
