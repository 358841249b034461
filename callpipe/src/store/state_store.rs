//! The durable pipeline ledger.

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::persist::{quarantine, read_state, sweep_temp_files, write_state};
use crate::core::{
    ArchiveCategory, ArchiveRecord, Attributes, DateRange, PipelineState, StageEntry, StageName,
};
use crate::errors::{LoadError, Result, ValidationError};
use crate::utils::{validate_attributes, validate_item_id, Clock, SystemClock, Timestamp};

/// What [`StateStore::load`] found on disk.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The file was read; `warnings` entries were repaired while parsing.
    Loaded {
        /// Number of dropped entries and corrected counters.
        warnings: usize,
    },
    /// No file existed; the store starts from an empty state.
    Fresh,
    /// The file could not be used; the store starts from an empty state.
    Recovered {
        /// Why the file was rejected.
        error: LoadError,
        /// Where the rejected file was moved, if it could be moved.
        backup: Option<PathBuf>,
    },
}

impl LoadOutcome {
    /// Returns true if the persisted file was rejected.
    #[must_use]
    pub const fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Durable ledger of pipeline progress.
///
/// All mutations serialize through one mutex. Each mutation is applied to a
/// copy of the state, the copy is written to disk, and only then does it
/// replace the in-memory state. Readers always see a whole state.
pub struct StateStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<PipelineState>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Opens the store backed by `path` using the system clock.
    ///
    /// A missing or unusable file yields an empty state; nothing is written
    /// until the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    /// Opens the store with an explicit time source.
    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let store = Self {
            path: path.into(),
            clock,
            state: Mutex::new(PipelineState::new(now)),
        };
        store.load();
        store
    }

    /// Path of the ledger file.
    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.path
    }

    /// Current time according to the store's clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Re-reads the ledger file, replacing the in-memory state.
    ///
    /// Never fails: an unreadable or malformed file is moved aside and the
    /// store continues from an empty state. Temp files left by an interrupted
    /// write are removed first.
    pub fn load(&self) -> LoadOutcome {
        let mut guard = self.state.lock();

        let swept = sweep_temp_files(&self.path);
        if swept > 0 {
            info!(path = %self.path.display(), swept, "Removed leftover temp files");
        }

        match read_state(&self.path) {
            Ok(Some(loaded)) => {
                for warning in &loaded.warnings {
                    warn!(path = %self.path.display(), "Ledger repaired on load: {}", warning);
                }
                info!(
                    path = %self.path.display(),
                    archived = loaded.state.archived_count(),
                    "Loaded pipeline state"
                );
                *guard = loaded.state;
                LoadOutcome::Loaded {
                    warnings: loaded.warnings.len(),
                }
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No state file, starting fresh");
                *guard = PipelineState::new(self.clock.now());
                LoadOutcome::Fresh
            }
            Err(error) => {
                let now = self.clock.now();
                let backup = match quarantine(&self.path, &now) {
                    Ok(backup) => Some(backup),
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "Could not move bad state file aside");
                        None
                    }
                };
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    backup = ?backup,
                    "State file unusable, starting from a fresh state"
                );
                *guard = PipelineState::new(now);
                LoadOutcome::Recovered { error, backup }
            }
        }
    }

    /// Writes the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let guard = self.state.lock();
        write_state(&self.path, &guard)?;
        Ok(())
    }

    /// Returns true if the item is completed in the stage.
    #[must_use]
    pub fn is_done(&self, stage: StageName, item_id: &str) -> bool {
        self.state.lock().is_done(stage, item_id)
    }

    /// Returns a copy of the item's current entry in the stage.
    #[must_use]
    pub fn entry(&self, stage: StageName, item_id: &str) -> Option<StageEntry> {
        self.state.lock().ledger(stage).get(item_id).cloned()
    }

    /// Returns an immutable copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> PipelineState {
        self.state.lock().clone()
    }

    /// Runs a read-only closure against the current state without copying it.
    pub fn read<T>(&self, f: impl FnOnce(&PipelineState) -> T) -> T {
        f(&self.state.lock())
    }

    /// Records a successful stage outcome.
    ///
    /// Returns true if the item was not completed in the stage before.
    pub fn mark_completed(
        &self,
        stage: StageName,
        item_id: &str,
        attributes: Attributes,
    ) -> Result<bool> {
        validate_item_id(item_id)?;
        validate_attributes(stage, item_id, &attributes)?;

        let newly = self.mutate(|state, now| {
            state
                .ledger_mut(stage)
                .upsert(item_id, StageEntry::completed(attributes, now))
        })?;

        if newly {
            info!(stage = %stage, item_id, "Marked completed");
        } else {
            debug!(stage = %stage, item_id, "Completion refreshed");
        }
        Ok(newly)
    }

    /// Records a failed stage outcome.
    ///
    /// The failure replaces whatever entry the item had, including a
    /// completion; the completed counter follows.
    pub fn mark_failed(&self, stage: StageName, item_id: &str, error: &str) -> Result<()> {
        validate_item_id(item_id)?;

        let was_completed = self.mutate(|state, now| {
            let ledger = state.ledger_mut(stage);
            let was_completed = ledger.is_completed(item_id);
            ledger.upsert(item_id, StageEntry::failed(error, now));
            was_completed
        })?;

        if was_completed {
            warn!(stage = %stage, item_id, error, "Failure replaced an earlier completion");
        } else {
            warn!(stage = %stage, item_id, error, "Marked failed");
        }
        Ok(())
    }

    /// Appends an archive record.
    pub fn record_archive(&self, category: ArchiveCategory, record: ArchiveRecord) -> Result<()> {
        if let Some(ref item_id) = record.item_id {
            validate_item_id(item_id)?;
        }
        let archive_path = record.archive_path.clone();

        self.mutate(|state, _| state.push_archive(category, record))?;

        debug!(category = %category, archive_path = %archive_path, "Recorded archive");
        Ok(())
    }

    /// Records one call id extraction run.
    ///
    /// Every call becomes a completed `get_call_ids` entry and the range is
    /// appended to the extraction log. Returns the number of calls not seen
    /// before.
    pub fn record_extraction(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        calls: Vec<(String, Attributes)>,
    ) -> Result<usize> {
        if start > end {
            return Err(ValidationError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }
        for (item_id, attributes) in &calls {
            validate_item_id(item_id)?;
            validate_attributes(StageName::GetCallIds, item_id, attributes)?;
        }

        let calls_found = calls.len();
        let newly = self.mutate(|state, now| {
            let ledger = state.ledger_mut(StageName::GetCallIds);
            let mut newly = 0;
            for (item_id, attributes) in calls {
                // Re-extracted calls keep their first attributes.
                if ledger.is_completed(&item_id) {
                    continue;
                }
                if ledger.upsert(item_id, StageEntry::completed(attributes, now)) {
                    newly += 1;
                }
            }

            let log = state.extraction_mut();
            log.processed_date_ranges.push(DateRange {
                start_date: start,
                end_date: end,
                calls_found,
                processed_at: now,
            });
            log.last_run = Some(now);
            newly
        })?;

        info!(%start, %end, calls_found, new_calls = newly, "Recorded extraction");
        Ok(newly)
    }

    /// Returns true if exactly this date range was extracted before.
    #[must_use]
    pub fn is_range_processed(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.state.lock().extraction().is_range_processed(start, end)
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut PipelineState, Timestamp) -> T) -> Result<T> {
        let mut guard = self.state.lock();
        let now = self.clock.now();

        let mut next = guard.clone();
        let out = apply(&mut next, now);
        next.last_updated = now.max(next.created_at);

        write_state(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StateError;
    use crate::utils::{parse_timestamp, FixedClock, MockClock};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn download_attrs(id: &str) -> Attributes {
        attrs(json!({"filename": format!("b1_{id}.wav"), "filepath": format!("audio/b1_{id}.wav")}))
    }

    fn fixed(raw: &str) -> Arc<dyn Clock> {
        Arc::new(FixedClock(parse_timestamp(raw).unwrap()))
    }

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::with_clock(
            dir.path().join("logs").join("pipeline_state.json"),
            fixed("2024-05-01T08:00:00Z"),
        )
    }

    #[test]
    fn test_open_without_file_is_fresh_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(!store.state_file().exists());
        assert!(!store.is_done(StageName::DownloadAudio, "C1"));
        assert!(matches!(store.load(), LoadOutcome::Fresh));
    }

    #[test]
    fn test_mark_completed_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store
            .mark_completed(StageName::DownloadAudio, "C1", download_attrs("C1"))
            .unwrap());

        let reopened = store_in(&dir);
        assert!(reopened.is_done(StageName::DownloadAudio, "C1"));
        assert_eq!(
            reopened
                .entry(StageName::DownloadAudio, "C1")
                .unwrap()
                .attribute_str("filename"),
            Some("b1_C1.wav")
        );
    }

    #[test]
    fn test_mark_completed_twice_counts_once() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.mark_completed(StageName::Analyze, "C1", Attributes::new()).unwrap());
        assert!(!store.mark_completed(StageName::Analyze, "C1", Attributes::new()).unwrap());

        let snapshot = store.snapshot();
        assert_eq!(snapshot.ledger(StageName::Analyze).completed_count(), 1);
        assert_eq!(snapshot.ledger(StageName::Analyze).len(), 1);
    }

    #[test]
    fn test_validation_rejects_before_mutation() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let missing = store.mark_completed(StageName::DownloadAudio, "C1", Attributes::new());
        let bad_id = store.mark_failed(StageName::Transcribe, "bad id", "boom");

        assert!(matches!(missing, Err(StateError::Validation(_))));
        assert!(matches!(bad_id, Err(StateError::Validation(_))));
        assert!(!store.state_file().exists());
        assert!(store.snapshot().ledger(StageName::DownloadAudio).is_empty());
    }

    #[test]
    fn test_failed_then_completed() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.mark_failed(StageName::UploadAudio, "C1", "HTTP 503").unwrap();
        assert!(!store.is_done(StageName::UploadAudio, "C1"));

        store
            .mark_completed(
                StageName::UploadAudio,
                "C1",
                attrs(json!({"file_url": "https://cdn.example/C1.wav"})),
            )
            .unwrap();

        let entry = store.entry(StageName::UploadAudio, "C1").unwrap();
        assert!(entry.is_completed());
        assert_eq!(entry.error, None);
        assert_eq!(store.snapshot().ledger(StageName::UploadAudio).completed_count(), 1);
    }

    #[test]
    fn test_failure_after_completion_decrements_counter() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.mark_completed(StageName::Analyze, "C1", Attributes::new()).unwrap();
        store.mark_failed(StageName::Analyze, "C1", "reanalysis failed").unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.ledger(StageName::Analyze).completed_count(), 0);
        assert!(snapshot.ledger(StageName::Analyze).is_failed("C1"));
    }

    #[test]
    fn test_last_updated_follows_clock() {
        let dir = TempDir::new().unwrap();
        let created = parse_timestamp("2024-05-01T08:00:00Z").unwrap();
        let later = parse_timestamp("2024-05-01T09:15:00.000250Z").unwrap();

        let mut clock = MockClock::new();
        let mut calls = 0;
        clock.expect_now().returning(move || {
            calls += 1;
            if calls <= 2 {
                created
            } else {
                later
            }
        });

        let store = StateStore::with_clock(dir.path().join("state.json"), Arc::new(clock));
        store.mark_completed(StageName::Analyze, "C1", Attributes::new()).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.created_at, created);
        assert_eq!(snapshot.last_updated, later);
        assert_eq!(snapshot.ledger(StageName::Analyze).get("C1").unwrap().timestamp, later);
    }

    #[test]
    fn test_persist_failure_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();

        let store = StateStore::with_clock(blocker.join("state.json"), fixed("2024-05-01T08:00:00Z"));
        let result = store.mark_completed(StageName::Analyze, "C1", Attributes::new());

        assert!(matches!(result, Err(StateError::Persist(_))));
        assert!(!store.is_done(StageName::Analyze, "C1"));
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"stages\": ").unwrap();

        let store = StateStore::with_clock(&path, fixed("2024-05-01T08:00:00Z"));
        assert!(store.snapshot().ledger(StageName::Analyze).is_empty());
        assert!(!path.exists());

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("state.json.corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);

        store.mark_completed(StageName::Analyze, "C1", Attributes::new()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_load_reports_recovery() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::with_clock(&path, fixed("2024-05-01T08:00:00Z"));

        fs::write(&path, b"[]").unwrap();
        let outcome = store.load();

        assert!(outcome.is_recovered());
        assert!(matches!(
            outcome,
            LoadOutcome::Recovered {
                error: LoadError::Malformed(_),
                backup: Some(_)
            }
        ));
    }

    #[test]
    fn test_record_extraction() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();

        let calls = vec![
            ("C1".to_string(), attrs(json!({"broker_id": "b1"}))),
            ("C2".to_string(), attrs(json!({"broker_id": "b2"}))),
        ];
        assert_eq!(store.record_extraction(start, end, calls).unwrap(), 2);

        let again = vec![("C2".to_string(), Attributes::new()), ("C3".to_string(), Attributes::new())];
        assert_eq!(store.record_extraction(start, end, again).unwrap(), 1);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.ledger(StageName::GetCallIds).completed_count(), 3);
        assert_eq!(
            snapshot
                .ledger(StageName::GetCallIds)
                .get("C2")
                .unwrap()
                .attribute_str("broker_id"),
            Some("b2")
        );
        assert_eq!(snapshot.extraction().processed_date_ranges.len(), 2);
        assert!(store.is_range_processed(start, end));
        assert!(!store.is_range_processed(start, start));
    }

    #[test]
    fn test_record_extraction_rejects_inverted_range() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let start = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();

        let result = store.record_extraction(start, end, Vec::new());
        assert!(matches!(
            result,
            Err(StateError::Validation(ValidationError::InvalidDateRange { .. }))
        ));
    }

    #[test]
    fn test_record_archive_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let record = ArchiveRecord {
            item_id: Some("C1".to_string()),
            original_filename: "b1_C1.txt".to_string(),
            archive_path: "archive/transcripts/2024-05-01/b1_C1.txt".to_string(),
            archived_at: store.now(),
        };

        store.record_archive(ArchiveCategory::Transcripts, record.clone()).unwrap();

        let reopened = store_in(&dir);
        assert_eq!(
            reopened.snapshot().archive_records(ArchiveCategory::Transcripts),
            &[record]
        );
    }

    #[test]
    fn test_flush_writes_fresh_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.flush().unwrap();
        assert!(store.state_file().exists());
        assert!(matches!(store.load(), LoadOutcome::Loaded { warnings: 0 }));
    }
}
