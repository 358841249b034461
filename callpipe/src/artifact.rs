//! Artifact file naming: `<broker_id>_<call_id>.<ext>`.

use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// The broker id never contains `_`; the call id may.
static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<broker>[^_/\\]+)_(?P<call>[^/\\]+)\.(?P<ext>[A-Za-z0-9]+)$")
        .expect("artifact name pattern is valid")
});

/// A parsed artifact file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    /// Broker the call belongs to.
    pub broker_id: String,
    /// The call (item) id.
    pub call_id: String,
    /// File extension without the dot.
    pub extension: String,
}

impl ArtifactName {
    /// Creates a name from its parts.
    #[must_use]
    pub fn new(
        broker_id: impl Into<String>,
        call_id: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            broker_id: broker_id.into(),
            call_id: call_id.into(),
            extension: extension.into(),
        }
    }

    /// Parses a file name such as `b17_C-2024_0001.wav`.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = ARTIFACT_NAME.captures(file_name)?;
        Some(Self::new(&caps["broker"], &caps["call"], &caps["ext"]))
    }

    /// The file name for these parts.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.broker_id, self.call_id, self.extension)
    }

    /// The same call with another extension, e.g. the transcript of a
    /// recording.
    #[must_use]
    pub fn with_extension(&self, extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            ..self.clone()
        }
    }
}

/// An artifact found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedArtifact {
    /// Parsed name.
    pub name: ArtifactName,
    /// Full path of the file.
    pub path: PathBuf,
}

/// Lists files in `dir` whose names parse as artifacts with `extension`,
/// sorted by call id. A missing directory yields an empty list.
pub fn scan_artifacts(dir: &Path, extension: &str) -> io::Result<Vec<ScannedArtifact>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().and_then(ArtifactName::parse) else {
            continue;
        };
        if name.extension.eq_ignore_ascii_case(extension) {
            found.push(ScannedArtifact {
                name,
                path: entry.path(),
            });
        }
    }

    found.sort_by(|a, b| a.name.call_id.cmp(&b.name.call_id));
    Ok(found)
}
