//! # Callpipe
//!
//! Durable, resumable state tracking for a multi-stage call processing
//! pipeline (call id extraction, audio download, transcription, audio
//! upload, analysis).
//!
//! Callpipe provides:
//!
//! - **A crash-safe ledger**: every stage outcome is written with a
//!   temp-file-and-rename sequence before the call returns
//! - **Work derivation**: the items each stage still needs, including the
//!   join that gates analysis on both transcription and upload
//! - **Archiving**: processed artifacts are moved into a dated archive tree
//!   and the move is recorded
//! - **A stage driver**: bounded-concurrency execution of stage operations
//!   with per-item failure recording
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use callpipe::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::from_env()?;
//! let paths = config.paths();
//! paths.ensure_directories()?;
//!
//! let store = Arc::new(StateStore::open(paths.state_file()));
//! let archive = Arc::new(ArchiveManager::new(Arc::clone(&store), paths.archive_root()));
//!
//! let driver = StageDriver::new(Arc::clone(&store))
//!     .with_config(config)
//!     .with_archive(archive)
//!     .with_results_log(paths.logs_dir());
//! let report = driver.run(&MyDownloader::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod archive;
pub mod artifact;
pub mod config;
pub mod core;
pub mod driver;
pub mod errors;
pub mod observability;
pub mod paths;
pub mod query;
pub mod stats;
pub mod store;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::ArchiveManager;
    pub use crate::artifact::{scan_artifacts, ArtifactName};
    pub use crate::config::PipelineConfig;
    pub use crate::core::{
        ArchiveCategory, ArchiveRecord, Attributes, EntryStatus, PipelineState, StageEntry,
        StageName,
    };
    pub use crate::driver::{BatchReport, ItemOutcome, StageArtifact, StageDriver, StageOperation};
    pub use crate::errors::{
        ArchiveError, ConfigError, LoadError, PersistError, StateError, ValidationError,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::paths::PipelinePaths;
    pub use crate::query::QueryEngine;
    pub use crate::stats::{FailedItems, ProcessingStats, StatsReporter};
    pub use crate::store::{LoadOutcome, StateStore};
}
