//! Per-stage ledger of entries.

use serde_json::Value;
use std::collections::BTreeMap;

use super::{StageEntry, StageName};
use crate::errors::LoadError;

/// Mapping from item identifier to the stage outcome for that item.
///
/// The completed counter is a cache of the number of completed entries and
/// is kept in step by every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageLedger {
    entries: BTreeMap<String, StageEntry>,
    completed: usize,
}

/// How a ledger load reconciled the stored counter with the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterCheck {
    /// Counter value found in the file, if any.
    pub stored: Option<u64>,
    /// Number of completed entries actually present.
    pub actual: usize,
}

impl CounterCheck {
    /// Returns true if the stored counter disagrees with the entries.
    #[must_use]
    pub fn drifted(&self) -> bool {
        self.stored
            .is_some_and(|stored| usize::try_from(stored).map_or(true, |s| s != self.actual))
    }
}

impl StageLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for an item.
    #[must_use]
    pub fn get(&self, item_id: &str) -> Option<&StageEntry> {
        self.entries.get(item_id)
    }

    /// Returns true if the item is completed in this ledger.
    #[must_use]
    pub fn is_completed(&self, item_id: &str) -> bool {
        self.entries.get(item_id).is_some_and(StageEntry::is_completed)
    }

    /// Returns true if the item's current entry is a failure.
    #[must_use]
    pub fn is_failed(&self, item_id: &str) -> bool {
        self.entries.get(item_id).is_some_and(StageEntry::is_failed)
    }

    /// Number of completed entries.
    #[must_use]
    pub const fn completed_count(&self) -> usize {
        self.completed
    }

    /// Total number of entries, completed and failed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries ordered by item id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Completed item ids, ordered.
    pub fn completed_ids(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, entry)| entry.is_completed())
            .map(|(id, _)| id)
    }

    /// Failed item ids, ordered.
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, entry)| entry.is_failed())
            .map(|(id, _)| id)
    }

    /// Inserts or replaces the entry for an item.
    ///
    /// Returns true if the item became completed with this call (it was
    /// absent or failed before and the new entry is completed).
    pub fn upsert(&mut self, item_id: impl Into<String>, entry: StageEntry) -> bool {
        let now_completed = entry.is_completed();
        let was_completed = self
            .entries
            .insert(item_id.into(), entry)
            .is_some_and(|previous| previous.is_completed());

        match (was_completed, now_completed) {
            (false, true) => self.completed += 1,
            (true, false) => self.completed -= 1,
            _ => {}
        }

        !was_completed && now_completed
    }

    /// Recounts completed entries from scratch.
    #[must_use]
    pub fn recount(&self) -> usize {
        self.entries.values().filter(|e| e.is_completed()).count()
    }

    /// Converts the ledger to its JSON fields for `stage`.
    ///
    /// Returns the entry map under the stage's ledger field and the counter
    /// under its counter field.
    #[must_use]
    pub fn to_json_fields(&self, stage: StageName) -> serde_json::Map<String, Value> {
        let entries: serde_json::Map<String, Value> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.to_json()))
            .collect();

        let mut map = serde_json::Map::new();
        map.insert(stage.ledger_field().to_string(), Value::Object(entries));
        map.insert(stage.counter_field().to_string(), serde_json::json!(self.completed));
        map
    }

    /// Parses the ledger for `stage` out of its stage object.
    ///
    /// Entries from the legacy failure map are merged in as failures unless
    /// the item is already completed. Individual entries that do not parse
    /// are returned in `skipped` rather than failing the whole ledger.
    pub fn from_json_fields(
        stage: StageName,
        object: &serde_json::Map<String, Value>,
    ) -> Result<ParsedLedger, LoadError> {
        let mut ledger = Self::new();
        let mut skipped = Vec::new();

        if let Some(entries) = object.get(stage.ledger_field()) {
            let entries = entries.as_object().ok_or_else(|| {
                LoadError::malformed(format!("'{}.{}' is not an object", stage, stage.ledger_field()))
            })?;
            for (item_id, value) in entries {
                match StageEntry::from_json(value) {
                    Ok(entry) => {
                        ledger.upsert(item_id.clone(), entry);
                    }
                    Err(e) => skipped.push((item_id.clone(), e.to_string())),
                }
            }
        }

        if let Some(failures) = stage
            .legacy_failed_field()
            .and_then(|field| object.get(field))
            .and_then(Value::as_object)
        {
            for (item_id, value) in failures {
                if ledger.is_completed(item_id) {
                    continue;
                }
                match StageEntry::from_legacy_failure(value) {
                    Ok(entry) => {
                        ledger.upsert(item_id.clone(), entry);
                    }
                    Err(e) => skipped.push((item_id.clone(), e.to_string())),
                }
            }
        }

        let counter = CounterCheck {
            stored: object.get(stage.counter_field()).and_then(Value::as_u64),
            actual: ledger.completed,
        };

        Ok(ParsedLedger {
            ledger,
            counter,
            skipped,
        })
    }
}

/// Result of parsing one stage ledger.
#[derive(Debug)]
pub struct ParsedLedger {
    /// The parsed ledger, counter recomputed from its entries.
    pub ledger: StageLedger,
    /// Stored versus recomputed counter.
    pub counter: CounterCheck,
    /// Item ids whose entries were dropped, with the reason.
    pub skipped: Vec<(String, String)>,
}
