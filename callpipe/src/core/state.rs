//! The pipeline state aggregate and its ledger file representation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ArchiveCategory, ArchiveRecord, StageLedger, StageName};
use crate::errors::LoadError;
use crate::utils::{format_iso8601, parse_timestamp, Timestamp};

/// Schema version written to new ledger files.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// A vendor date range whose calls have been extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day of the range, inclusive.
    pub start_date: NaiveDate,
    /// Last day of the range, inclusive.
    pub end_date: NaiveDate,
    /// Number of calls the extraction returned.
    pub calls_found: usize,
    /// When the extraction ran.
    #[serde(with = "crate::utils::timestamps::serde_iso")]
    pub processed_at: Timestamp,
}

/// Bookkeeping of the call id extraction stage beyond its ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionLog {
    /// Ranges processed so far, in the order they ran.
    pub processed_date_ranges: Vec<DateRange>,
    /// Time of the most recent extraction.
    pub last_run: Option<Timestamp>,
}

impl ExtractionLog {
    /// Returns true if exactly this range was extracted before.
    #[must_use]
    pub fn is_range_processed(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.processed_date_ranges
            .iter()
            .any(|range| range.start_date == start && range.end_date == end)
    }
}

/// The aggregate root: every stage ledger plus the archive records.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    /// Version of the ledger schema.
    pub schema_version: String,
    /// When the ledger was first created.
    pub created_at: Timestamp,
    /// When the ledger was last mutated.
    pub last_updated: Timestamp,
    stages: BTreeMap<StageName, StageLedger>,
    archived_files: BTreeMap<ArchiveCategory, Vec<ArchiveRecord>>,
    extraction: ExtractionLog,
}

/// A state parsed from disk, with the repairs made while parsing.
#[derive(Debug)]
pub struct LoadedState {
    /// The parsed state.
    pub state: PipelineState,
    /// Human-readable notes about dropped entries and corrected counters.
    pub warnings: Vec<String>,
}

impl PipelineState {
    /// Creates an empty state with every stage ledger present.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: now,
            last_updated: now,
            stages: StageName::ALL
                .into_iter()
                .map(|stage| (stage, StageLedger::new()))
                .collect(),
            archived_files: ArchiveCategory::ALL
                .into_iter()
                .map(|category| (category, Vec::new()))
                .collect(),
            extraction: ExtractionLog::default(),
        }
    }

    /// Returns the ledger of a stage.
    #[must_use]
    pub fn ledger(&self, stage: StageName) -> &StageLedger {
        static EMPTY: std::sync::OnceLock<StageLedger> = std::sync::OnceLock::new();
        self.stages
            .get(&stage)
            .unwrap_or_else(|| EMPTY.get_or_init(StageLedger::new))
    }

    /// Mutable access to a stage ledger.
    ///
    /// Changing a snapshot does not change the store it was taken from.
    pub fn ledger_mut(&mut self, stage: StageName) -> &mut StageLedger {
        self.stages.entry(stage).or_default()
    }

    /// Returns true if the item is completed in the stage.
    #[must_use]
    pub fn is_done(&self, stage: StageName, item_id: &str) -> bool {
        self.ledger(stage).is_completed(item_id)
    }

    /// Archive records of one category, oldest first.
    #[must_use]
    pub fn archive_records(&self, category: ArchiveCategory) -> &[ArchiveRecord] {
        self.archived_files
            .get(&category)
            .map_or(&[], Vec::as_slice)
    }

    /// Total number of archived files across categories.
    #[must_use]
    pub fn archived_count(&self) -> usize {
        self.archived_files.values().map(Vec::len).sum()
    }

    pub(crate) fn push_archive(&mut self, category: ArchiveCategory, record: ArchiveRecord) {
        self.archived_files.entry(category).or_default().push(record);
    }

    /// The call id extraction log.
    #[must_use]
    pub const fn extraction(&self) -> &ExtractionLog {
        &self.extraction
    }

    pub(crate) fn extraction_mut(&mut self) -> &mut ExtractionLog {
        &mut self.extraction
    }

    /// Returns true if both states hold the same ledgers, counters,
    /// archive records, and extraction log. `last_updated` is ignored.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.schema_version == other.schema_version
            && self.created_at == other.created_at
            && self.stages == other.stages
            && self.archived_files == other.archived_files
            && self.extraction == other.extraction
    }

    /// Converts the state to the ledger file document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut stages = serde_json::Map::new();
        for (stage, ledger) in &self.stages {
            let mut object = ledger.to_json_fields(*stage);
            if *stage == StageName::GetCallIds {
                object.insert(
                    "processed_date_ranges".to_string(),
                    serde_json::to_value(&self.extraction.processed_date_ranges)
                        .unwrap_or_else(|_| Value::Array(Vec::new())),
                );
                object.insert(
                    "last_run".to_string(),
                    self.extraction
                        .last_run
                        .as_ref()
                        .map_or(Value::Null, |ts| Value::String(format_iso8601(ts))),
                );
            }
            stages.insert(stage.to_string(), Value::Object(object));
        }

        let archived: serde_json::Map<String, Value> = self
            .archived_files
            .iter()
            .map(|(category, records)| {
                (
                    category.to_string(),
                    serde_json::to_value(records).unwrap_or_else(|_| Value::Array(Vec::new())),
                )
            })
            .collect();

        serde_json::json!({
            "version": self.schema_version,
            "created": format_iso8601(&self.created_at),
            "last_updated": format_iso8601(&self.last_updated),
            "stages": stages,
            "archived_files": archived,
        })
    }

    /// Parses a ledger file document.
    ///
    /// The document shape (top-level object, `stages`, timestamps) must be
    /// valid. Below that, entries and records that do not parse are dropped
    /// and reported in [`LoadedState::warnings`]; stored counters are
    /// replaced by the recomputed ones.
    pub fn from_json(value: &Value) -> Result<LoadedState, LoadError> {
        let root = value
            .as_object()
            .ok_or_else(|| LoadError::malformed("document is not an object"))?;
        let mut warnings = Vec::new();

        let schema_version = root
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or(SCHEMA_VERSION)
            .to_string();

        let created_at = required_timestamp(root, "created")?;
        let mut last_updated = match root.get("last_updated") {
            None => created_at,
            Some(Value::String(raw)) => match parse_timestamp(raw) {
                Ok(ts) => ts,
                Err(e) => {
                    warnings.push(format!("bad 'last_updated' ({e}); reset to created"));
                    created_at
                }
            },
            Some(other) => {
                warnings.push(format!("'last_updated' is {other}, not a timestamp; reset to created"));
                created_at
            }
        };
        if last_updated < created_at {
            warnings.push("last_updated precedes created; reset to created".to_string());
            last_updated = created_at;
        }

        let mut state = Self::new(created_at);
        state.schema_version = schema_version;
        state.last_updated = last_updated;

        let stages = root
            .get("stages")
            .and_then(Value::as_object)
            .ok_or_else(|| LoadError::malformed("'stages' is missing or not an object"))?;

        for stage in StageName::ALL {
            let Some(object) = stages.get(stage.as_str()) else {
                continue;
            };
            let object = object.as_object().ok_or_else(|| {
                LoadError::malformed(format!("stage '{stage}' is not an object"))
            })?;

            let parsed = StageLedger::from_json_fields(stage, object)?;
            if parsed.counter.drifted() {
                warnings.push(format!(
                    "{stage}: stored {} = {:?} but ledger has {} completed entries",
                    stage.counter_field(),
                    parsed.counter.stored,
                    parsed.counter.actual
                ));
            }
            for (item_id, reason) in parsed.skipped {
                warnings.push(format!("{stage}: dropped entry '{item_id}': {reason}"));
            }
            state.stages.insert(stage, parsed.ledger);

            if stage == StageName::GetCallIds {
                state.extraction = parse_extraction_log(object, &mut warnings);
            }
        }

        if let Some(archived) = root.get("archived_files").and_then(Value::as_object) {
            for (name, records) in archived {
                let Ok(category) = name.parse::<ArchiveCategory>() else {
                    warnings.push(format!("archived_files: unknown category '{name}' dropped"));
                    continue;
                };
                let Some(records) = records.as_array() else {
                    warnings.push(format!("archived_files.{name} is not a list"));
                    continue;
                };
                for record in records {
                    match serde_json::from_value::<ArchiveRecord>(record.clone()) {
                        Ok(record) => state.push_archive(category, record),
                        Err(e) => warnings.push(format!("archived_files.{name}: dropped record: {e}")),
                    }
                }
            }
        }

        Ok(LoadedState { state, warnings })
    }
}

fn required_timestamp(
    root: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Timestamp, LoadError> {
    let raw = root
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::malformed(format!("'{field}' is missing or not a string")))?;
    parse_timestamp(raw).map_err(|e| LoadError::malformed(format!("bad '{field}': {e}")))
}

fn parse_extraction_log(
    object: &serde_json::Map<String, Value>,
    warnings: &mut Vec<String>,
) -> ExtractionLog {
    let mut log = ExtractionLog::default();

    if let Some(ranges) = object.get("processed_date_ranges").and_then(Value::as_array) {
        for range in ranges {
            match serde_json::from_value::<DateRange>(range.clone()) {
                Ok(range) => log.processed_date_ranges.push(range),
                Err(e) => warnings.push(format!("get_call_ids: dropped date range: {e}")),
            }
        }
    }

    log.last_run = match object.get("last_run") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => match parse_timestamp(raw) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warnings.push(format!("get_call_ids: dropped last_run: {e}"));
                None
            }
        },
        Some(other) => {
            warnings.push(format!("get_call_ids: dropped last_run {other}"));
            None
        }
    };

    log
}
