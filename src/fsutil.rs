//! Directory-scan helpers shared by the store and the export services.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

/// List a directory's files once. Later passes must tolerate entries that
/// have since disappeared; a missing or unreadable directory is an empty
/// listing, not an error.
pub(crate) fn snapshot_dir(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Files in a directory sorted oldest-first by modification time.
pub(crate) fn list_sorted_files(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<(SystemTime, PathBuf)> = snapshot_dir(dir)
        .into_iter()
        .filter_map(|path| {
            let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((mtime, path))
        })
        .collect();
    entries.sort();
    entries.into_iter().map(|(_, path)| path).collect()
}

pub(crate) fn count_files(dir: &Path) -> usize {
    snapshot_dir(dir).len()
}

/// Overwrite-safe move; falls back to copy-then-delete when the rename
/// crosses a filesystem boundary.
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        fs::remove_file(to)?;
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}
