//! Moves processed artifacts into the dated archive tree.
//!
//! Layout: `<archive_root>/<category>/<YYYY-MM-DD>/<original_filename>`.
//! A taken name is disambiguated as `name_2.ext`, `name_3.ext`, ...

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{ArchiveCategory, ArchiveRecord};
use crate::errors::{ArchiveError, Result};
use crate::store::StateStore;
use crate::utils::{format_date, validate_item_id};

/// Highest numeric suffix tried before giving up on a name.
const MAX_NAME_SUFFIX: u32 = 1000;

/// Relocates artifacts and records each move in the state store.
#[derive(Debug)]
pub struct ArchiveManager {
    store: Arc<StateStore>,
    archive_root: PathBuf,
    // Name resolution and the move must not interleave between callers.
    moves: Mutex<()>,
}

impl ArchiveManager {
    /// Creates a manager archiving under `archive_root`.
    pub fn new(store: Arc<StateStore>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            archive_root: archive_root.into(),
            moves: Mutex::new(()),
        }
    }

    /// Root of the archive tree.
    #[must_use]
    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Moves `source` into the archive and records the move.
    ///
    /// Returns the final archive path. On success the source no longer
    /// exists and exactly one archive record was appended. If recording
    /// fails the file is moved back and the error is returned.
    pub fn archive(
        &self,
        source: &Path,
        category: ArchiveCategory,
        item_id: Option<&str>,
    ) -> Result<PathBuf> {
        if let Some(item_id) = item_id {
            validate_item_id(item_id)?;
        }

        let metadata = fs::symlink_metadata(source).map_err(|_| ArchiveError::NotFound {
            path: source.to_path_buf(),
        })?;
        if metadata.is_dir() {
            return Err(ArchiveError::InvalidSource {
                path: source.to_path_buf(),
            }
            .into());
        }
        let original_filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::InvalidSource {
                path: source.to_path_buf(),
            })?
            .to_string();

        let now = self.store.now();
        let directory = self
            .archive_root
            .join(category.as_str())
            .join(format_date(&now));

        let _guard = self.moves.lock();

        fs::create_dir_all(&directory).map_err(|e| ArchiveError::CreateDirectory {
            path: directory.clone(),
            source: e,
        })?;
        let destination = resolve_conflict(&directory, &original_filename)?;
        move_file(source, &destination)?;

        let record = ArchiveRecord {
            item_id: item_id.map(str::to_string),
            original_filename,
            archive_path: destination.display().to_string(),
            archived_at: now,
        };

        if let Err(e) = self.store.record_archive(category, record) {
            match move_file(&destination, source) {
                Ok(()) => warn!(
                    source = %source.display(),
                    error = %e,
                    "Archive record failed, file restored"
                ),
                Err(restore) => warn!(
                    source = %source.display(),
                    destination = %destination.display(),
                    error = %e,
                    restore_error = %restore,
                    "Archive record failed and the file could not be restored"
                ),
            }
            return Err(e);
        }

        info!(
            category = %category,
            item_id = item_id.unwrap_or(""),
            destination = %destination.display(),
            "Archived artifact"
        );
        Ok(destination)
    }
}

/// Renames `src` to `dst`, falling back to copy and delete across devices.
fn move_file(src: &Path, dst: &Path) -> std::result::Result<(), ArchiveError> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(from = %src.display(), to = %dst.display(), error = %e, "Rename failed, copying");
            copy_then_remove(src, dst)
        }
    }
}

/// Copies `src` to `dst` and removes `src`.
///
/// Exactly one copy of the file remains whatever the outcome: on success
/// only `dst`, on error only `src`.
fn copy_then_remove(src: &Path, dst: &Path) -> std::result::Result<(), ArchiveError> {
    let move_error = |source| ArchiveError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source,
    };

    if let Err(e) = fs::copy(src, dst) {
        let _ = fs::remove_file(dst);
        return Err(move_error(e));
    }
    if let Err(e) = fs::remove_file(src) {
        let _ = fs::remove_file(dst);
        return Err(move_error(e));
    }
    Ok(())
}

/// Returns the first free path for `filename` in `directory`.
fn resolve_conflict(directory: &Path, filename: &str) -> std::result::Result<PathBuf, ArchiveError> {
    let path = directory.join(filename);
    if fs::symlink_metadata(&path).is_err() {
        return Ok(path);
    }

    let (base, ext) = match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], &filename[dot..]),
        _ => (filename, ""),
    };

    (2..=MAX_NAME_SUFFIX)
        .map(|n| directory.join(format!("{base}_{n}{ext}")))
        .find(|candidate| fs::symlink_metadata(candidate).is_err())
        .ok_or(ArchiveError::NameExhausted(path))
}
