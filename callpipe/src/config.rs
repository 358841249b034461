//! Pipeline configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::StageName;
use crate::errors::ConfigError;
use crate::paths::PipelinePaths;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Configuration file used when `CONFIG_PATH` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline_config.json";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory settings.
    #[serde(default)]
    pub directories: DirectoriesConfig,
    /// Execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Directory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    /// Base working directory holding logs, output and archive.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

/// Execution settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum number of items a stage run picks up; unlimited when unset.
    #[serde(default)]
    pub test_limit: Option<usize>,
    /// Worker counts per stage.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

/// Worker counts per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Concurrent downloads.
    #[serde(default = "default_download")]
    pub download_audio: usize,
    /// Concurrent transcriptions.
    #[serde(default = "default_transcribe")]
    pub transcribe: usize,
    /// Concurrent uploads.
    #[serde(default = "default_upload")]
    pub upload_audio: usize,
    /// Concurrent analyses.
    #[serde(default = "default_analyze")]
    pub analyze: usize,
}

fn default_download() -> usize {
    5
}

fn default_transcribe() -> usize {
    5
}

fn default_upload() -> usize {
    2
}

fn default_analyze() -> usize {
    3
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            download_audio: default_download(),
            transcribe: default_transcribe(),
            upload_audio: default_upload(),
            analyze: default_analyze(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `CONFIG_PATH`, or the default path.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&Self::config_path())
    }

    /// The configuration path `from_env` reads.
    #[must_use]
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    }

    /// Checks values that deserialize but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directories.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("directories.base_dir is empty".to_string()));
        }
        if self.execution.test_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "execution.test_limit must be at least 1".to_string(),
            ));
        }
        for stage in StageName::ALL {
            if self.concurrency_for(stage) == 0 {
                return Err(ConfigError::Invalid(format!(
                    "execution.concurrency.{stage} must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Directory layout under the configured base directory.
    #[must_use]
    pub fn paths(&self) -> PipelinePaths {
        PipelinePaths::new(&self.directories.base_dir)
    }

    /// Worker count for a stage. Extraction always runs on one worker.
    #[must_use]
    pub const fn concurrency_for(&self, stage: StageName) -> usize {
        let concurrency = &self.execution.concurrency;
        match stage {
            StageName::GetCallIds => 1,
            StageName::DownloadAudio => concurrency.download_audio,
            StageName::Transcribe => concurrency.transcribe,
            StageName::UploadAudio => concurrency.upload_audio,
            StageName::Analyze => concurrency.analyze,
        }
    }

    /// Sets the base directory.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.directories.base_dir = base_dir.into();
        self
    }

    /// Sets the per-run item limit.
    #[must_use]
    pub fn with_test_limit(mut self, limit: usize) -> Self {
        self.execution.test_limit = Some(limit);
        self
    }

    /// Sets the worker count of a stage. Ignored for `get_call_ids`.
    #[must_use]
    pub fn with_concurrency(mut self, stage: StageName, workers: usize) -> Self {
        let concurrency = &mut self.execution.concurrency;
        match stage {
            StageName::GetCallIds => {}
            StageName::DownloadAudio => concurrency.download_audio = workers,
            StageName::Transcribe => concurrency.transcribe = workers,
            StageName::UploadAudio => concurrency.upload_audio = workers,
            StageName::Analyze => concurrency.analyze = workers,
        }
        self
    }
}
