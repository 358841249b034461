//! Working directory layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::ArchiveCategory;

/// Directories and files derived from the pipeline base directory.
///
/// ```text
/// <base>/logs/pipeline_state.json
/// <base>/output/{call_ids,audio,transcripts}
/// <base>/archive/{call_ids,audio,transcripts,failed}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePaths {
    base_dir: PathBuf,
}

/// Working output directories produced by the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Extracted call id spreadsheets.
    CallIds,
    /// Downloaded recordings.
    Audio,
    /// Transcript files.
    Transcripts,
}

impl OutputKind {
    const ALL: [Self; 3] = [Self::CallIds, Self::Audio, Self::Transcripts];

    const fn dir_name(self) -> &'static str {
        match self {
            Self::CallIds => "call_ids",
            Self::Audio => "audio",
            Self::Transcripts => "transcripts",
        }
    }
}

impl PipelinePaths {
    /// Creates the layout rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/logs`.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// The ledger file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.logs_dir().join("pipeline_state.json")
    }

    /// Root of the archive tree.
    #[must_use]
    pub fn archive_root(&self) -> PathBuf {
        self.base_dir.join("archive")
    }

    /// `<base>/archive/<category>`.
    #[must_use]
    pub fn archive_dir(&self, category: ArchiveCategory) -> PathBuf {
        self.archive_root().join(category.as_str())
    }

    /// `<base>/output/<kind>`.
    #[must_use]
    pub fn output_dir(&self, kind: OutputKind) -> PathBuf {
        self.base_dir.join("output").join(kind.dir_name())
    }

    /// Creates every directory of the layout.
    pub fn ensure_directories(&self) -> io::Result<()> {
        fs::create_dir_all(self.logs_dir())?;
        for category in ArchiveCategory::ALL {
            fs::create_dir_all(self.archive_dir(category))?;
        }
        for kind in OutputKind::ALL {
            fs::create_dir_all(self.output_dir(kind))?;
        }
        Ok(())
    }
}
