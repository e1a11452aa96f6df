//! Configuration module for zfs-s3-backup
//!
//! - `settings`: raw, optional values from a JSON file, flags and environment
//! - `backup`: the validated [`BackupConfig`] a run executes against

pub mod backup;
pub mod settings;

pub use backup::{artifact_extension, BackupConfig, RemoteTarget};
pub use settings::Settings;
