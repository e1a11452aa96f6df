//! Run configuration arguments
//!
//! Every setting is a long flag that can also come from a named environment
//! variable, which is how cron jobs and systemd units usually configure a
//! run. Values given here override the optional JSON settings file.

use std::path::PathBuf;

use clap::Args;

use crate::config::{BackupConfig, Settings};
use crate::error::BackupResult;
use crate::filter::split_pattern_list;

/// Configuration flags shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// JSON settings file; flags and environment override it
    #[arg(long = "config", env = "ZFS_BACKUP_CONFIG", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Root dataset (pool) to back up
    #[arg(long, env = "ZFS_POOL")]
    pub pool: Option<String>,

    /// full (one replication stream of the pool) or split (one stream per dataset)
    #[arg(long = "mode", env = "BACKUP_MODE")]
    pub backup_mode: Option<String>,

    /// none, include or exclude (split mode only)
    #[arg(long, env = "FILTER_MODE")]
    pub filter_mode: Option<String>,

    /// Comma-separated dataset name segments for the filter
    #[arg(long, env = "FILTER_LIST", value_name = "LIST")]
    pub filter_list: Option<String>,

    /// Backups kept per dataset; retention is off when unset
    #[arg(long, env = "MAX_BACKUPS")]
    pub max_backups: Option<usize>,

    /// pre (delete before sending) or post (delete after a successful send)
    #[arg(long, env = "DELETION_MODE")]
    pub deletion_mode: Option<String>,

    /// s3://bucket/prefix or file:///dir
    #[arg(long, env = "REMOTE_URL", value_name = "URL")]
    pub remote_url: Option<String>,

    /// Key prefix of whole-pool backups
    #[arg(long, env = "FULL_PREFIX")]
    pub full_prefix: Option<String>,

    /// Key prefix of per-dataset backups
    #[arg(long, env = "SPLIT_PREFIX")]
    pub split_prefix: Option<String>,

    /// zstd level 1-22, or 0 to upload the raw stream
    #[arg(long, env = "ZSTD_LEVEL", allow_negative_numbers = true)]
    pub zstd_level: Option<i32>,

    /// S3 storage class for uploads (e.g. STANDARD_IA, DEEP_ARCHIVE)
    #[arg(long, env = "S3_STORAGE_CLASS")]
    pub storage_class: Option<String>,

    /// Shell command run with the failure message on stdin and in $BACKUP_MESSAGE
    #[arg(long, env = "NOTIFY_COMMAND", value_name = "COMMAND")]
    pub notify_command: Option<String>,

    /// File locked for the duration of a run
    #[arg(long, env = "LOCK_FILE", value_name = "FILE")]
    pub lock_file: Option<PathBuf>,

    /// Path of the zfs binary
    #[arg(long, env = "ZFS_BIN", value_name = "PATH")]
    pub zfs_bin: Option<PathBuf>,

    /// Path of the aws CLI binary
    #[arg(long, env = "AWS_BIN", value_name = "PATH")]
    pub aws_bin: Option<PathBuf>,
}

impl SettingsArgs {
    /// The values given on the command line or in the environment
    pub fn to_settings(&self) -> Settings {
        Settings {
            schema_version: 0,
            pool: self.pool.clone(),
            backup_mode: self.backup_mode.clone(),
            filter_mode: self.filter_mode.clone(),
            filter_list: self.filter_list.as_deref().map(split_pattern_list),
            max_backups: self.max_backups,
            deletion_mode: self.deletion_mode.clone(),
            remote_url: self.remote_url.clone(),
            full_prefix: self.full_prefix.clone(),
            split_prefix: self.split_prefix.clone(),
            zstd_level: self.zstd_level,
            storage_class: self.storage_class.clone(),
            notify_command: self.notify_command.clone(),
            lock_file: self.lock_file.clone(),
            zfs_bin: self.zfs_bin.clone(),
            aws_bin: self.aws_bin.clone(),
        }
    }

    /// Settings file overlaid with flags and environment
    pub fn merged_settings(&self) -> BackupResult<Settings> {
        let file = Settings::load_or_default(self.config_file.as_deref())?;
        Ok(file.overlay(self.to_settings()))
    }

    /// Resolve and validate the run configuration
    pub fn resolve(&self) -> BackupResult<BackupConfig> {
        BackupConfig::from_settings(&self.merged_settings()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupMode;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.json");
        fs::write(
            &path,
            r#"{"pool": "tank", "backup_mode": "split", "remote_url": "file:///srv/b", "max_backups": 5}"#,
        )
        .unwrap();

        let args = SettingsArgs {
            config_file: Some(path),
            filter_mode: Some("include".into()),
            filter_list: Some("home, docs".into()),
            max_backups: Some(2),
            ..Default::default()
        };

        let config = args.resolve().unwrap();
        assert_eq!(config.pool, "tank");
        assert_eq!(config.mode, BackupMode::Split);
        assert_eq!(config.filter.patterns(), &["home", "docs"]);
        assert_eq!(config.retention.map(|r| r.keep), Some(2));
    }

    #[test]
    fn test_resolve_without_file() {
        let args = SettingsArgs {
            pool: Some("tank".into()),
            remote_url: Some("s3://bucket".into()),
            zstd_level: Some(0),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.naming.extension, "zfs");
    }
}
