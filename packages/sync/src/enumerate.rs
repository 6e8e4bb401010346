//! Recursive listing of the local files to transfer.

use std::path::{Path, PathBuf};

/// Directory traversal failed.
#[derive(Debug, thiserror::Error)]
#[error("Failed to walk {}: {source}", root.display())]
pub struct EnumerateError {
    /// Root of the traversal.
    pub root: PathBuf,
    /// Underlying traversal error.
    #[source]
    pub source: walkdir::Error,
}

/// Lists every regular file under `root`, recursively.
///
/// Directories are not returned. Symlinks are neither followed nor returned,
/// even when they point at a file; each one is logged at `debug` level. Any
/// unreadable entry fails the whole listing; partial results are discarded.
/// The returned order is sorted but callers should not depend on it.
///
/// # Errors
///
/// Returns [`EnumerateError`] if `root` or any directory below it cannot be
/// read.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, EnumerateError> {
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| EnumerateError {
            root: root.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type();
        if file_type.is_file() {
            files.push(entry.into_path());
        } else if file_type.is_symlink() {
            log::debug!("Skipping symlink {}", entry.path().display());
        }
    }

    log::debug!("Found {} file(s) under {}", files.len(), root.display());
    Ok(files)
}
