//! Error types for the pipeline state store.
//!
//! The taxonomy follows how each failure is handled:
//!
//! - [`LoadError`] is recovered from (fresh default state, logged).
//! - [`PersistError`] is surfaced to the caller and aborts a batch.
//! - [`ArchiveError`] is a per-item failure; the batch continues.
//! - [`ValidationError`] rejects a mutation before anything changes.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::StageName;

/// Result alias used throughout the crate.
pub type Result<T, E = StateError> = std::result::Result<T, E>;

/// The main error type for state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The persisted ledger could not be read or parsed.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// The ledger could not be written to disk.
    #[error("{0}")]
    Persist(#[from] PersistError),

    /// An artifact could not be archived.
    #[error("{0}")]
    Archive(#[from] ArchiveError),

    /// A mutation was rejected before it was applied.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Configuration is missing or malformed.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl StateError {
    /// Returns true if the error must abort the whole batch.
    ///
    /// Only persistence and configuration failures are fatal; everything
    /// else is recorded against a single item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persist(_) | Self::Config(_))
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let kind = match self {
            Self::Load(_) => "LoadError",
            Self::Persist(_) => "PersistError",
            Self::Archive(ArchiveError::NotFound { .. }) => "ArchiveNotFound",
            Self::Archive(_) => "ArchiveError",
            Self::Validation(_) => "ValidationError",
            Self::Config(_) => "ConfigError",
        };

        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("fatal".to_string(), serde_json::json!(self.is_fatal()));
        map
    }
}

/// Error raised when the persisted ledger cannot be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("Failed to read state file '{path}': {source}")]
    Read {
        /// The state file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("Failed to parse state file '{path}': {source}")]
    Parse {
        /// The state file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The JSON does not have the ledger shape.
    #[error("Malformed state document: {0}")]
    Malformed(String),
}

impl LoadError {
    /// Creates a malformed document error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Error raised when the ledger cannot be written.
#[derive(Debug, Error)]
#[error("Failed to persist state to '{path}': {source}")]
pub struct PersistError {
    /// The state file path.
    pub path: PathBuf,
    /// The underlying I/O error.
    #[source]
    pub source: std::io::Error,
}

impl PersistError {
    /// Creates a new persist error.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while archiving an artifact.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The source artifact does not exist.
    #[error("Source file not found: {path}")]
    NotFound {
        /// The missing source path.
        path: PathBuf,
    },

    /// The source path has no usable file name.
    #[error("Source path has no file name: {path}")]
    InvalidSource {
        /// The offending path.
        path: PathBuf,
    },

    /// The destination directory could not be created.
    #[error("Failed to create archive directory '{path}': {source}")]
    CreateDirectory {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be moved.
    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        /// The source path.
        from: PathBuf,
        /// The destination path.
        to: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No free destination name was found.
    #[error("No free archive name for '{0}'")]
    NameExhausted(PathBuf),
}

/// Error raised when a mutation is rejected before it is applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ValidationError {
    /// The item identifier is malformed.
    #[error("Invalid item id '{item_id}': {reason}")]
    InvalidItemId {
        /// The rejected identifier.
        item_id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A required attribute is missing for the stage.
    #[error("Stage '{stage}' requires attribute '{attribute}' for item '{item_id}'")]
    MissingAttribute {
        /// The stage being marked.
        stage: StageName,
        /// The item being marked.
        item_id: String,
        /// The missing attribute key.
        attribute: String,
    },

    /// An attribute uses a key the ledger reserves for itself.
    #[error("Attribute key '{attribute}' is reserved")]
    ReservedAttribute {
        /// The reserved key.
        attribute: String,
    },

    /// A date range with its end before its start.
    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange {
        /// Range start.
        start: String,
        /// Range end.
        end: String,
    },
}

impl ValidationError {
    /// Creates an invalid item id error.
    #[must_use]
    pub fn invalid_item_id(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidItemId {
            item_id: item_id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        /// The config path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid.
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        /// The config path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value failed validation.
    #[error("Config validation failed: {0}")]
    Invalid(String),
}
