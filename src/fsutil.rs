use std::io::Write;
use std::path::Path;

use crate::error::{AppError, Result};

fn write_atomic_blocking(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Internal(format!("path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    // Hidden + .tmp so directory scans never mistake it for a finished file.
    // Dropped (and removed) on any error before persist.
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

/// Atomically write `contents` to `path` (unique temp file in the same directory + rename).
///
/// Readers observe either the previous file or the complete new one, never a prefix.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let path = path.to_path_buf();
    let contents = contents.to_vec();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &contents))
        .await
        .map_err(|e| AppError::Internal(format!("Atomic write task panicked: {e}")))?
}
