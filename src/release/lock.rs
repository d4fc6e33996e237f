use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

use fd_lock::RwLock;

use crate::error::{AppError, Result};

/// Exclusive write access to one working tree, backed by an OS file lock.
///
/// Every acquisition opens the lock file anew, so two synchronizers (in this process
/// or another one) on the same tree exclude each other. Acquisition never waits: a
/// second writer gets `AppError::TreeLocked` instead of queueing behind the first and
/// then mutating a tree it never inspected. A crashed holder releases the lock with
/// its file descriptor.
#[derive(Debug, Clone)]
pub struct TreeLock {
    path: PathBuf,
}

/// Held for the whole mutating operation; released when the file is closed on drop.
pub struct TreeGuard {
    _file: RwLock<File>,
}

impl TreeLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn try_acquire(&self) -> Result<TreeGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        let mut lock = RwLock::new(file);

        match lock.try_write() {
            // Closing the descriptor is what unlocks, so the guard itself is not kept
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::warn!(lock = %self.path.display(), "Working tree lock contended");
                return Err(AppError::TreeLocked);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(TreeGuard { _file: lock })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = TreeLock::new(tmp.path().join("widget.lock"));
        let guard = lock.try_acquire().unwrap();
        assert!(matches!(lock.try_acquire(), Err(AppError::TreeLocked)));
        assert!(matches!(lock.clone().try_acquire(), Err(AppError::TreeLocked)));

        drop(guard);
        let again = lock.try_acquire();
        assert!(again.is_ok());
    }

    #[test]
    fn test_independent_handles_on_one_file_exclude_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("widget.lock");
        let first = TreeLock::new(&path);
        let second = TreeLock::new(&path);

        let _guard = first.try_acquire().unwrap();
        assert!(matches!(second.try_acquire(), Err(AppError::TreeLocked)));
    }
}
