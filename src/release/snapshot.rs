//! Full-copy snapshots of a working tree, taken before destructive operations.
//!
//! All functions here block on filesystem I/O; callers run them on the blocking pool.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{AppError, Result};
use crate::release::ReleaseRecord;

/// A backup of the working tree (metadata directory excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub source_path: PathBuf,
    /// Release record at capture time, restored together with the tree.
    pub release_record: Option<ReleaseRecord>,
}

/// Directory-name prefix shared by every snapshot of `tree`.
pub fn snapshot_prefix(tree: &Path) -> String {
    let name = tree
        .file_name()
        .map(|n| n.to_string_lossy().replace(|c: char| !c.is_ascii_alphanumeric(), "_"))
        .unwrap_or_else(|| "root".to_string());
    format!("{name}-snapshot-")
}

/// Copy `tree` into a fresh directory under `state_dir`.
///
/// A partially written snapshot is removed before the error is returned.
pub fn capture(
    tree: &Path,
    state_dir: &Path,
    exclude: &str,
    release_record: Option<ReleaseRecord>,
) -> Result<RepoSnapshot> {
    fs::create_dir_all(tree)?;
    fs::create_dir_all(state_dir)?;

    let created_at = Utc::now();
    let path = state_dir.join(format!(
        "{}{}",
        snapshot_prefix(tree),
        created_at.format("%Y%m%dT%H%M%S%.9f")
    ));

    if let Err(e) = copy_tree(tree, &path, Some(exclude)) {
        let _ = fs::remove_dir_all(&path);
        return Err(e);
    }

    tracing::debug!(snapshot = %path.display(), tree = %tree.display(), "Snapshot captured");
    Ok(RepoSnapshot {
        path,
        created_at,
        source_path: tree.to_path_buf(),
        release_record,
    })
}

/// Remove every snapshot of `tree` in `state_dir` except `keep`. Returns how many were pruned.
pub fn prune_except(tree: &Path, state_dir: &Path, keep: &Path) -> Result<usize> {
    let prefix = snapshot_prefix(tree);
    let mut pruned = 0;
    for entry in fs::read_dir(state_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path == keep || !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        fs::remove_dir_all(&path)?;
        tracing::debug!(snapshot = %path.display(), "Pruned superseded snapshot");
        pruned += 1;
    }
    Ok(pruned)
}

/// Make the tree's contents equal to the snapshot's. The metadata directory is left alone.
pub fn restore(snapshot: &RepoSnapshot, exclude: &str) -> Result<()> {
    if !snapshot.path.is_dir() {
        return Err(AppError::NoBackupAvailable);
    }
    fs::create_dir_all(&snapshot.source_path)?;
    clear_tree(&snapshot.source_path, exclude)?;
    copy_tree(&snapshot.path, &snapshot.source_path, None)
}

/// Delete every top-level entry of `dir` except `exclude`.
pub fn clear_tree(dir: &Path, exclude: &str) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == OsStr::new(exclude) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, skipping a top-level `exclude` entry.
pub fn copy_tree(src: &Path, dst: &Path, exclude: Option<&str>) -> Result<()> {
    fs::create_dir_all(dst)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && exclude.is_some_and(|x| e.file_name() == OsStr::new(x))));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::Internal(format!("walk escaped {}: {e}", src.display())))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link_target = fs::read_link(src)?;
    std::os::unix::fs::symlink(link_target, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)?;
    Ok(())
}

/// Move the top-level entries of `src` into `dst` (rename, copying across filesystems).
pub fn move_tree_contents(src: &Path, dst: &Path, exclude: &str) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_name() == OsStr::new(exclude) {
            continue;
        }
        let target = dst.join(entry.file_name());
        if fs::rename(entry.path(), &target).is_ok() {
            continue;
        }
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target, None)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
