//! Reading and atomically replacing the ledger file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::{LoadedState, PipelineState};
use crate::errors::{LoadError, PersistError};
use crate::utils::Timestamp;

/// Reads and parses the ledger file.
///
/// Returns `Ok(None)` if the file does not exist.
pub(crate) fn read_state(path: &Path) -> Result<Option<LoadedState>, LoadError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LoadError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let document: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    PipelineState::from_json(&document).map(Some)
}

/// Suffix of in-flight temporary files.
const TEMP_SUFFIX: &str = ".tmp";

/// Writes the state next to `path` and renames it over the live file.
pub(crate) fn write_state(path: &Path, state: &PipelineState) -> Result<(), PersistError> {
    write_json_atomic(path, &state.to_json())
}

/// Writes `value` as pretty JSON to a temporary sibling of `path`, fsyncs
/// it, and renames it over `path`.
///
/// The temporary file lives in the same directory so the rename stays on
/// one file system. If any step fails the live file is untouched.
pub(crate) fn write_json_atomic(path: &Path, value: &serde_json::Value) -> Result<(), PersistError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| PersistError::new(path, e))?;

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PersistError::new(path, io::Error::other(e)))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&temp_prefix(path))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| PersistError::new(path, e))?;
    tmp.write_all(&bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| PersistError::new(path, e))?;
    tmp.persist(path)
        .map_err(|e| PersistError::new(path, e.error))?;

    sync_directory(parent);
    Ok(())
}

/// Removes temporary files an interrupted write left next to `path`.
///
/// Returns the number of files removed. Callers must hold the lock that
/// serializes writes to `path`.
pub(crate) fn sweep_temp_files(path: &Path) -> usize {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Ok(entries) = fs::read_dir(parent) else {
        return 0;
    };
    let prefix = temp_prefix(path);

    let mut removed = 0;
    for entry in entries.filter_map(std::result::Result::ok) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(&prefix) && name.ends_with(TEMP_SUFFIX)) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Could not remove temp file");
            }
        }
    }
    removed
}

/// `.pipeline_state.json.` for `logs/pipeline_state.json`.
fn temp_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.")
}

/// Moves an unreadable ledger aside so the next write does not destroy it.
pub(crate) fn quarantine(path: &Path, now: &Timestamp) -> io::Result<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S%.6f")));
    let backup = path.with_file_name(name);
    fs::rename(path, &backup)?;
    Ok(backup)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %dir.display(), error = %e, "Directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) {}
