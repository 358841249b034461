//! Progress statistics derived from the ledger.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{PipelineState, StageName};
use crate::store::StateStore;

/// Completed counts per stage plus archive totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStats {
    /// Calls completed in `get_call_ids`.
    pub extracted: usize,
    /// Sum of `calls_found` over the processed extraction ranges. Ranges
    /// imported from ledgers without per-call entries count here but not in
    /// `extracted`.
    pub calls_found: usize,
    /// Calls completed in `download_audio`.
    pub downloaded: usize,
    /// Calls completed in `transcribe`.
    pub transcribed: usize,
    /// Calls completed in `upload_audio`.
    pub uploaded: usize,
    /// Calls completed in `analyze`.
    pub analyzed: usize,
    /// Archive records across all categories.
    pub archived_count: usize,
    /// `analyzed / extracted` as a percentage; 0 when nothing was extracted.
    pub completion_rate: f64,
}

impl ProcessingStats {
    /// Computes statistics from a state snapshot.
    #[must_use]
    pub fn from_state(state: &PipelineState) -> Self {
        let count = |stage| state.ledger(stage).completed_count();
        let extracted = count(StageName::GetCallIds);
        let analyzed = count(StageName::Analyze);

        #[allow(clippy::cast_precision_loss)]
        let completion_rate = if extracted == 0 {
            0.0
        } else {
            analyzed as f64 / extracted as f64 * 100.0
        };

        Self {
            extracted,
            calls_found: state
                .extraction()
                .processed_date_ranges
                .iter()
                .map(|range| range.calls_found)
                .sum(),
            downloaded: count(StageName::DownloadAudio),
            transcribed: count(StageName::Transcribe),
            uploaded: count(StageName::UploadAudio),
            analyzed,
            archived_count: state.archived_count(),
            completion_rate,
        }
    }

    /// Completion rate formatted with one decimal, e.g. `"42.5%"`.
    #[must_use]
    pub fn completion_rate_display(&self) -> String {
        if self.extracted == 0 {
            "0%".to_string()
        } else {
            format!("{:.1}%", self.completion_rate)
        }
    }

    /// Completed count of one stage.
    #[must_use]
    pub const fn completed(&self, stage: StageName) -> usize {
        match stage {
            StageName::GetCallIds => self.extracted,
            StageName::DownloadAudio => self.downloaded,
            StageName::Transcribe => self.transcribed,
            StageName::UploadAudio => self.uploaded,
            StageName::Analyze => self.analyzed,
        }
    }
}

/// Item ids whose current entry is a failure, per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FailedItems(BTreeMap<StageName, Vec<String>>);

impl FailedItems {
    /// Collects failures from a state snapshot. Stages without failures
    /// are listed with an empty list.
    #[must_use]
    pub fn from_state(state: &PipelineState) -> Self {
        Self(
            StageName::ALL
                .into_iter()
                .map(|stage| {
                    let ids = state.ledger(stage).failed_ids().map(str::to_string).collect();
                    (stage, ids)
                })
                .collect(),
        )
    }

    /// Failed item ids of one stage, ordered.
    #[must_use]
    pub fn for_stage(&self, stage: StageName) -> &[String] {
        self.0.get(&stage).map_or(&[], Vec::as_slice)
    }

    /// Total failures across stages.
    #[must_use]
    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Iterates stages with their failed ids.
    pub fn iter(&self) -> impl Iterator<Item = (StageName, &[String])> {
        self.0.iter().map(|(stage, ids)| (*stage, ids.as_slice()))
    }
}

/// Reports statistics over a live store.
#[derive(Debug, Clone)]
pub struct StatsReporter {
    store: Arc<StateStore>,
}

impl StatsReporter {
    /// Creates a reporter over a store.
    #[must_use]
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Current processing statistics.
    #[must_use]
    pub fn stats(&self) -> ProcessingStats {
        self.store.read(ProcessingStats::from_state)
    }

    /// Current failures per stage.
    #[must_use]
    pub fn failed_items(&self) -> FailedItems {
        self.store.read(FailedItems::from_state)
    }
}
