//! Bounded-concurrency stage runner.
//!
//! A [`StageDriver`] asks the query engine for the items a stage still has
//! to process, runs the stage operation over them with at most
//! `concurrency` in flight, and records every outcome in the state store.
//! Per-item failures become ledger entries; only a failed write to the
//! ledger aborts the run.
//!
//! With [`StageDriver::with_results_log`] set, every finished run also leaves
//! `<stage>_results_<timestamp>_<run_id>.json` in that directory: the
//! [`BatchReport`] totals plus one outcome per executed item.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::archive::ArchiveManager;
use crate::config::PipelineConfig;
use crate::core::{ArchiveCategory, Attributes, StageName};
use crate::errors::Result;
use crate::observability::RunTimer;
use crate::query::QueryEngine;
use crate::store::{persist, StateStore};
use crate::utils::{format_iso8601, Timestamp};

/// A file the driver should archive after recording success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    /// The working copy to move.
    pub path: PathBuf,
    /// Archive category.
    pub category: ArchiveCategory,
}

/// What a successful stage operation hands back to the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageArtifact {
    /// Attributes to record with the completed entry.
    pub attributes: Attributes,
    /// File to archive once the completion is recorded.
    pub archive: Option<ArchiveRequest>,
}

impl StageArtifact {
    /// Creates an artifact without attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Requests archiving of `path` under `category`.
    #[must_use]
    pub fn with_archive(mut self, path: impl Into<PathBuf>, category: ArchiveCategory) -> Self {
        self.archive = Some(ArchiveRequest {
            path: path.into(),
            category,
        });
        self
    }
}

/// The external work of one stage for one item.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageOperation: Send + Sync {
    /// The stage this operation implements.
    fn stage(&self) -> StageName;

    /// Processes one item.
    async fn execute(&self, item_id: &str) -> anyhow::Result<StageArtifact>;
}

/// Outcome of one executed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    /// The item.
    pub item_id: String,
    /// Whether the item was recorded as completed.
    pub success: bool,
    /// Failure message recorded in the ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Unique, time-ordered id of the run.
    pub run_id: Uuid,
    /// The stage that ran.
    pub stage: StageName,
    /// When the run started, by the store's clock.
    pub started_at: Timestamp,
    /// Items the operation was executed for.
    pub attempted: usize,
    /// Items recorded as completed.
    pub succeeded: usize,
    /// Items recorded as failed.
    pub failed: usize,
    /// Items already completed when their turn came.
    pub skipped: usize,
    /// Completed items whose artifact could not be archived.
    pub archive_failures: usize,
    /// Wall time of the run.
    pub duration: Duration,
    /// One entry per executed item, in completion order.
    pub results: Vec<ItemOutcome>,
    /// Where the results log was written, if it was.
    pub log_file: Option<PathBuf>,
}

impl BatchReport {
    fn new(run_id: Uuid, stage: StageName, started_at: Timestamp) -> Self {
        Self {
            run_id,
            stage,
            started_at,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            archive_failures: 0,
            duration: Duration::ZERO,
            results: Vec::new(),
            log_file: None,
        }
    }

    fn record_success(&mut self, item_id: &str) {
        self.succeeded += 1;
        self.results.push(ItemOutcome {
            item_id: item_id.to_string(),
            success: true,
            error: None,
        });
    }

    fn record_failure(&mut self, item_id: &str, error: String) {
        self.failed += 1;
        self.results.push(ItemOutcome {
            item_id: item_id.to_string(),
            success: false,
            error: Some(error),
        });
    }

    /// File name of this run's results log.
    #[must_use]
    pub fn log_file_name(&self) -> String {
        format!(
            "{}_results_{}_{}.json",
            self.stage,
            self.started_at.format("%Y%m%dT%H%M%S"),
            self.run_id
        )
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "stage": self.stage.as_str(),
            "started_at": format_iso8601(&self.started_at),
            "attempted": self.attempted,
            "succeeded": self.succeeded,
            "failed": self.failed,
            "skipped": self.skipped,
            "archive_failures": self.archive_failures,
            "duration_ms": self.duration.as_secs_f64() * 1000.0,
            "results": serde_json::to_value(&self.results).unwrap_or_else(|_| Value::Array(Vec::new())),
        })
    }
}

/// Runs stage operations against the state store.
#[derive(Debug)]
pub struct StageDriver {
    store: Arc<StateStore>,
    queries: QueryEngine,
    archive: Option<Arc<ArchiveManager>>,
    results_dir: Option<PathBuf>,
    config: PipelineConfig,
}

impl StageDriver {
    /// Creates a driver with default configuration and no archiving.
    #[must_use]
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            queries: QueryEngine::new(Arc::clone(&store)),
            store,
            archive: None,
            results_dir: None,
            config: PipelineConfig::default(),
        }
    }

    /// Sets the configuration (concurrency and item limit).
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables archiving of the artifacts operations return.
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<ArchiveManager>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Writes a results log for every finished run into `dir`, usually
    /// [`PipelinePaths::logs_dir`](crate::paths::PipelinePaths::logs_dir).
    #[must_use]
    pub fn with_results_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    /// Runs the operation over every pending item of its stage.
    ///
    /// Returns an error only if the ledger could not be written; the run
    /// stops at that point and items already recorded stay recorded.
    pub async fn run(&self, operation: &dyn StageOperation) -> Result<BatchReport> {
        let stage = operation.stage();
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("stage_run", stage = %stage, run_id = %run_id);

        self.run_inner(operation, stage, run_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        operation: &dyn StageOperation,
        stage: StageName,
        run_id: Uuid,
    ) -> Result<BatchReport> {
        let timer = RunTimer::start(stage.as_str());
        let mut report = BatchReport::new(run_id, stage, self.store.now());

        let mut items = self.queries.items_for(stage);
        if let Some(limit) = self.config.execution.test_limit {
            items.truncate(limit);
        }
        let concurrency = self.config.concurrency_for(stage).max(1);
        info!(pending = items.len(), concurrency, "Starting stage run");

        let store = &self.store;
        let mut outcomes = stream::iter(items)
            .map(|item_id| async move {
                if store.is_done(stage, &item_id) {
                    return (item_id, None);
                }
                let result = operation.execute(&item_id).await;
                (item_id, Some(result))
            })
            .buffer_unordered(concurrency);

        while let Some((item_id, result)) = outcomes.next().await {
            match result {
                None => report.skipped += 1,
                Some(Ok(artifact)) => {
                    report.attempted += 1;
                    self.record_success(stage, &item_id, artifact, &mut report)?;
                }
                Some(Err(e)) => {
                    report.attempted += 1;
                    let message = format!("{e:#}");
                    recoverable(self.store.mark_failed(stage, &item_id, &message))?;
                    report.record_failure(&item_id, message);
                }
            }
        }

        report.duration = timer.finish();
        if let Some(dir) = &self.results_dir {
            report.log_file = write_results_log(dir, &report);
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            archive_failures = report.archive_failures,
            "Stage run finished"
        );
        Ok(report)
    }

    fn record_success(
        &self,
        stage: StageName,
        item_id: &str,
        artifact: StageArtifact,
        report: &mut BatchReport,
    ) -> Result<()> {
        match self.store.mark_completed(stage, item_id, artifact.attributes) {
            Ok(_) => report.record_success(item_id),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let message = format!("Invalid stage result: {e}");
                recoverable(self.store.mark_failed(stage, item_id, &message))?;
                report.record_failure(item_id, message);
                return Ok(());
            }
        }

        let Some(request) = artifact.archive else {
            return Ok(());
        };
        let Some(ref archive) = self.archive else {
            warn!(item_id, path = %request.path.display(), "Archiving requested but no archive configured");
            report.archive_failures += 1;
            return Ok(());
        };

        match archive.archive(&request.path, request.category, Some(item_id)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(item_id, error = %e, "Archiving failed");
                report.archive_failures += 1;
                Ok(())
            }
        }
    }
}

/// Writes the report into `dir`. The ledger stays authoritative, so a
/// failed write is only logged.
fn write_results_log(dir: &Path, report: &BatchReport) -> Option<PathBuf> {
    let path = dir.join(report.log_file_name());
    match persist::write_json_atomic(&path, &report.to_json()) {
        Ok(()) => {
            info!(path = %path.display(), "Results logged");
            Some(path)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not write results log");
            None
        }
    }
}

/// Passes fatal errors through and logs the rest.
fn recoverable(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(error = %e, "Could not record outcome");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
