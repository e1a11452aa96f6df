//! Core data models for zfs-s3-backup
//!
//! This module contains the plain data structures shared by every stage of
//! a run: modes, datasets, run timestamps and artifact naming.

pub mod dataset;
pub mod mode;
pub mod naming;

pub use dataset::Dataset;
pub use mode::{BackupMode, DeletionMode};
pub use naming::{timestamp_token, ArtifactNaming, RunTimestamp, TIMESTAMP_FORMAT};
