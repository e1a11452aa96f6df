//! Snapshot lifecycle
//!
//! A run creates exactly one recursive, timestamp-labelled snapshot of the
//! source tree before any data moves, and must destroy it on every exit
//! path. `SnapshotGuard` ties the destroy to the guard's lifetime: the
//! orchestrator releases it explicitly to observe the outcome, and `Drop`
//! covers unwinding.

use tracing::{info, warn};

use crate::collaborators::SnapshotStore;
use crate::error::{BackupError, BackupResult};

/// A snapshot created by this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    /// Dataset the snapshot was taken on
    pub root: String,
    /// Snapshot label (the run timestamp)
    pub label: String,
    /// Whether descendants were snapshotted too
    pub recursive: bool,
}

impl SnapshotHandle {
    /// `root@label`
    pub fn reference(&self) -> String {
        format!("{}@{}", self.root, self.label)
    }
}

/// Creates and destroys run snapshots through the storage collaborator
pub struct SnapshotManager<'a> {
    store: &'a dyn SnapshotStore,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(store: &'a dyn SnapshotStore) -> Self {
        Self { store }
    }

    /// Create `root@label`
    ///
    /// Either the snapshot exists tree-wide afterwards or an error is
    /// returned and no handle exists.
    pub fn create(&self, root: &str, label: &str, recursive: bool) -> BackupResult<SnapshotHandle> {
        let handle = SnapshotHandle {
            root: root.to_string(),
            label: label.to_string(),
            recursive,
        };

        self.store
            .create_snapshot(root, label, recursive)
            .map_err(|e| match e {
                BackupError::SnapshotCreate(_) => e,
                other => BackupError::SnapshotCreate(format!("{}: {}", handle.reference(), other)),
            })?;

        info!(snapshot = %handle.reference(), recursive, "Created snapshot");
        Ok(handle)
    }

    /// Destroy a snapshot created by [`create`](Self::create)
    ///
    /// A snapshot that no longer exists counts as destroyed.
    pub fn destroy(&self, handle: &SnapshotHandle) -> BackupResult<()> {
        let reference = handle.reference();
        match self.store.destroy_snapshot(&reference, handle.recursive) {
            Ok(()) => {
                info!(snapshot = %reference, "Destroyed snapshot");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                info!(snapshot = %reference, "Snapshot already gone, nothing to destroy");
                Ok(())
            }
            Err(BackupError::SnapshotDestroy(msg)) => Err(BackupError::SnapshotDestroy(msg)),
            Err(other) => Err(BackupError::SnapshotDestroy(format!("{}: {}", reference, other))),
        }
    }

    /// Create a snapshot wrapped in a guard that destroys it when released or dropped
    pub fn acquire(&self, root: &str, label: &str, recursive: bool) -> BackupResult<SnapshotGuard<'a>> {
        let handle = self.create(root, label, recursive)?;
        Ok(SnapshotGuard {
            manager: SnapshotManager { store: self.store },
            handle: Some(handle),
        })
    }
}

/// Owns a live snapshot and destroys it exactly once
pub struct SnapshotGuard<'a> {
    manager: SnapshotManager<'a>,
    handle: Option<SnapshotHandle>,
}

impl<'a> SnapshotGuard<'a> {
    /// The guarded snapshot
    pub fn handle(&self) -> Option<&SnapshotHandle> {
        self.handle.as_ref()
    }

    /// Destroy the snapshot now and report the outcome
    pub fn release(mut self) -> BackupResult<()> {
        match self.handle.take() {
            Some(handle) => self.manager.destroy(&handle),
            None => Ok(()),
        }
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(snapshot = %handle.reference(), "Snapshot guard dropped without release, destroying");
            if let Err(e) = self.manager.destroy(&handle) {
                warn!(snapshot = %handle.reference(), error = %e, "Failed to destroy snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::{MemoryPool, PoolCall};

    fn pool() -> MemoryPool {
        MemoryPool::new("tank", &["tank/home", "tank/docs"])
    }

    #[test]
    fn test_create_and_destroy() {
        let pool = pool();
        let manager = SnapshotManager::new(&pool);

        let handle = manager.create("tank", "20250101_000000", true).unwrap();
        assert_eq!(handle.reference(), "tank@20250101_000000");
        assert!(pool.has_snapshot("tank/home@20250101_000000"));

        manager.destroy(&handle).unwrap();
        assert!(!pool.has_snapshot("tank@20250101_000000"));
        assert!(!pool.has_snapshot("tank/home@20250101_000000"));
    }

    #[test]
    fn test_create_failure_returns_no_handle() {
        let pool = pool();
        pool.fail_create("pool is busy");
        let manager = SnapshotManager::new(&pool);

        let err = manager.create("tank", "20250101_000000", true).unwrap_err();
        assert!(matches!(err, BackupError::SnapshotCreate(_)));
        assert_eq!(pool.snapshot_count(), 0);
    }

    #[test]
    fn test_create_collision() {
        let pool = pool();
        let manager = SnapshotManager::new(&pool);
        manager.create("tank", "20250101_000000", true).unwrap();

        let err = manager.create("tank", "20250101_000000", true).unwrap_err();
        assert!(matches!(err, BackupError::SnapshotCreate(_)));
    }

    #[test]
    fn test_destroy_missing_is_ok() {
        let pool = pool();
        let manager = SnapshotManager::new(&pool);
        let handle = SnapshotHandle {
            root: "tank".into(),
            label: "20250101_000000".into(),
            recursive: true,
        };

        manager.destroy(&handle).unwrap();
    }

    #[test]
    fn test_destroy_failure_is_reported() {
        let pool = pool();
        let manager = SnapshotManager::new(&pool);
        let handle = manager.create("tank", "20250101_000000", true).unwrap();
        pool.fail_destroy("dataset is busy");

        let err = manager.destroy(&handle).unwrap_err();
        assert!(matches!(err, BackupError::SnapshotDestroy(_)));
    }

    #[test]
    fn test_guard_release_destroys_once() {
        let pool = pool();
        let manager = SnapshotManager::new(&pool);

        let guard = manager.acquire("tank", "20250101_000000", true).unwrap();
        guard.release().unwrap();

        assert_eq!(pool.count_calls(|c| matches!(c, PoolCall::Destroy(_))), 1);
        assert_eq!(pool.snapshot_count(), 0);
    }

    #[test]
    fn test_guard_drop_destroys() {
        let pool = pool();
        let manager = SnapshotManager::new(&pool);

        {
            let _guard = manager.acquire("tank", "20250101_000000", true).unwrap();
        }

        assert_eq!(pool.count_calls(|c| matches!(c, PoolCall::Destroy(_))), 1);
        assert_eq!(pool.snapshot_count(), 0);
    }
}
