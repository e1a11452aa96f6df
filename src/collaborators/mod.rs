//! External collaborators
//!
//! The engine only talks to the outside world through these traits:
//!
//! - [`SnapshotStore`]: the snapshotting storage pool (ZFS)
//! - [`Compressor`]: a streaming byte transform
//! - [`RemoteStore`]: the object store artifacts are uploaded to
//! - [`Notifier`]: optional failure alerting
//!
//! Concrete adapters live in the submodules; `memory` holds in-process
//! fakes with failure injection for tests.

use std::io::{Read, Write};

use crate::error::BackupResult;
use crate::models::Dataset;

pub mod compression;
pub mod local;
pub mod memory;
pub mod notify;
mod process;
pub mod s3;
pub mod zfs;

pub use compression::{RawCompressor, ZstdCompressor};
pub use local::LocalStore;
pub use notify::CommandNotifier;
pub use s3::AwsCliStore;
pub use zfs::ZfsCli;

/// The source storage pool
pub trait SnapshotStore: Send + Sync {
    /// The root dataset and all of its descendants, parents before children
    fn list_datasets(&self, root: &str) -> BackupResult<Vec<Dataset>>;

    /// Create `root@label`, atomically across descendants when `recursive`
    fn create_snapshot(&self, root: &str, label: &str, recursive: bool) -> BackupResult<()>;

    /// Destroy `snapshot_ref`; a missing snapshot is a `NotFound` error
    fn destroy_snapshot(&self, snapshot_ref: &str, recursive: bool) -> BackupResult<()>;

    /// Start streaming `snapshot_ref`; `replicate` includes descendants
    fn open_stream(&self, snapshot_ref: &str, replicate: bool)
        -> BackupResult<Box<dyn SnapshotStream>>;
}

/// Bytes of one snapshot as produced by the storage pool
///
/// Reaching EOF does not prove the producer succeeded; callers must call
/// [`finish`](SnapshotStream::finish) after draining the stream. Dropping
/// an unfinished stream aborts the producer.
pub trait SnapshotStream: Read + Send {
    /// Confirm the producer completed successfully
    fn finish(&mut self) -> BackupResult<()>;
}

/// Streaming compression
pub trait Compressor: Send + Sync {
    /// Compress `input` into `output` until EOF, returning bytes consumed
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> BackupResult<u64>;
}

/// Object store holding uploaded artifacts
pub trait RemoteStore: Send + Sync {
    /// Human-readable location for logs and reports
    fn location(&self) -> String;

    /// Every committed object key in the target location
    ///
    /// Partially written objects are never listed.
    fn list(&self) -> BackupResult<Vec<String>>;

    /// Upload `data` under `key`, returning bytes written
    ///
    /// The object becomes visible only if `data` reaches EOF without error;
    /// a failing reader leaves no object behind.
    fn write(&self, key: &str, data: &mut dyn Read) -> BackupResult<u64>;

    /// Delete `key`; a missing object is a `NotFound` error
    fn delete(&self, key: &str) -> BackupResult<()>;
}

/// Failure alerting
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str) -> BackupResult<()>;
}
