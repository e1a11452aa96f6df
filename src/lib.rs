//! zfs-s3-backup - ZFS snapshot backups to object storage
//!
//! This library implements the backup engine: it snapshots a ZFS pool,
//! streams each snapshot through zstd into an object store, and rotates old
//! backups so at most a configured number survive per dataset.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Settings file, environment overlay and the validated `BackupConfig`
//! - `error`: Custom error types
//! - `models`: Modes, datasets, run timestamps and artifact naming
//! - `filter`: Include/exclude dataset selection
//! - `snapshot`: Run snapshot lifecycle with guaranteed cleanup
//! - `transfer`: Concurrent read/compress/upload pipeline
//! - `retention`: Choosing and deleting expired backups
//! - `orchestrator`: The run state machine tying it all together
//! - `collaborators`: Interfaces to zfs, compression, object stores and notifiers
//! - `cancel`, `lock`, `logging`: Process-level concerns of the binary
//!
//! # Example
//!
//! ```rust,ignore
//! use zfs_s3_backup::cancel::CancelToken;
//! use zfs_s3_backup::cli::Adapters;
//! use zfs_s3_backup::config::{BackupConfig, Settings};
//! use zfs_s3_backup::orchestrator::BackupRunner;
//!
//! let config = BackupConfig::from_settings(&Settings::load(path)?)?;
//! let cancel = CancelToken::new();
//! let adapters = Adapters::from_config(&config, &cancel);
//! let report = BackupRunner::new(&config, adapters.collaborators(), cancel).run()?;
//! ```

pub mod cancel;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod display;
pub mod error;
pub mod filter;
pub mod lock;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod retention;
pub mod snapshot;
pub mod transfer;

pub use error::{BackupError, BackupResult};
