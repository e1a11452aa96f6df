//! Raw settings for zfs-s3-backup
//!
//! `Settings` is the unvalidated form of a run's configuration. It is filled
//! from an optional JSON file and then overlaid with values from flags and
//! environment variables; [`BackupConfig`](super::BackupConfig) turns the
//! result into the validated structure the engine runs on.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};

/// Unvalidated settings; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Root dataset (the pool) to back up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// `full` or `split`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_mode: Option<String>,

    /// `none`, `include` or `exclude`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_mode: Option<String>,

    /// Dataset name segments the filter matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_list: Option<Vec<String>>,

    /// Artifacts kept per namespace; retention is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<usize>,

    /// `pre` or `post`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_mode: Option<String>,

    /// `s3://bucket/prefix` or `file:///dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_prefix: Option<String>,

    /// zstd level; 0 uploads the raw stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zstd_level: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Shell command run on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zfs_bin: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_bin: Option<PathBuf>,
}

fn default_schema_version() -> u32 {
    1
}

/// `b` if set, else `a`
fn pick<T>(a: Option<T>, b: Option<T>) -> Option<T> {
    b.or(a)
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> BackupResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            BackupError::Config(format!(
                "Failed to parse settings file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Load `path` if given, otherwise start from empty settings
    pub fn load_or_default(path: Option<&Path>) -> BackupResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self {
                schema_version: default_schema_version(),
                ..Default::default()
            }),
        }
    }

    /// Layer `overrides` on top; fields set there win
    pub fn overlay(self, overrides: Settings) -> Settings {
        Settings {
            schema_version: self.schema_version.max(overrides.schema_version),
            pool: pick(self.pool, overrides.pool),
            backup_mode: pick(self.backup_mode, overrides.backup_mode),
            filter_mode: pick(self.filter_mode, overrides.filter_mode),
            filter_list: pick(self.filter_list, overrides.filter_list),
            max_backups: pick(self.max_backups, overrides.max_backups),
            deletion_mode: pick(self.deletion_mode, overrides.deletion_mode),
            remote_url: pick(self.remote_url, overrides.remote_url),
            full_prefix: pick(self.full_prefix, overrides.full_prefix),
            split_prefix: pick(self.split_prefix, overrides.split_prefix),
            zstd_level: pick(self.zstd_level, overrides.zstd_level),
            storage_class: pick(self.storage_class, overrides.storage_class),
            notify_command: pick(self.notify_command, overrides.notify_command),
            lock_file: pick(self.lock_file, overrides.lock_file),
            zfs_bin: pick(self.zfs_bin, overrides.zfs_bin),
            aws_bin: pick(self.aws_bin, overrides.aws_bin),
        }
    }

    /// Write settings to `path` atomically (temp file, fsync, rename)
    pub fn save(&self, path: &Path) -> BackupResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let temp_path = path.with_extension("json.tmp");
        let file = File::create(&temp_path)
            .map_err(|e| BackupError::Io(format!("Failed to create temp file: {}", e)))?;

        let mut writer = BufWriter::new(file);
        let written = serde_json::to_writer_pretty(&mut writer, self)
            .map_err(BackupError::from)
            .and_then(|_| writer.flush().map_err(BackupError::from))
            .and_then(|_| writer.get_ref().sync_all().map_err(BackupError::from));

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            BackupError::Io(format!("Failed to rename temp file: {}", e))
        })
    }
}
