//! Prints pipeline progress and failed items as JSON.

use anyhow::Context;
use callpipe::prelude::*;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::from_env()).context("Failed to initialize tracing")?;

    let config_path = PipelineConfig::config_path();
    let config = PipelineConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let store = Arc::new(StateStore::open(config.paths().state_file()));
    let reporter = StatsReporter::new(store);

    let stats = reporter.stats();
    let report = serde_json::json!({
        "stats": stats,
        "completion_rate": stats.completion_rate_display(),
        "failed_items": reporter.failed_items(),
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to render report")?
    );
    Ok(())
}
