//! Run-level mutual exclusion
//!
//! Two runs against the same pool would race on the snapshot label and on
//! retention deletes. When a lock file is configured the run holds an
//! exclusive, non-blocking `flock` on it for its whole duration; the lock
//! is released when the file handle drops, including on crash.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{BackupError, BackupResult};

/// Held for the lifetime of a run
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    /// Take the lock or fail immediately if another run holds it
    pub fn acquire(path: &Path) -> BackupResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                BackupError::Lock(format!("failed to open lock file {}: {}", path.display(), e))
            })?;

        file.try_lock_exclusive().map_err(|_| {
            BackupError::Lock(format!(
                "another backup run holds {}",
                path.display()
            ))
        })?;

        debug!(path = %path.display(), "Acquired run lock");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.lock");

        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, BackupError::Lock(_)));

        drop(first);
        let again = RunLock::acquire(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }
}
