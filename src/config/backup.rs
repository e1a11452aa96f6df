//! Validated run configuration
//!
//! `BackupConfig` is built once from [`Settings`] and passed by reference
//! into every component. Validation collects every problem it finds and
//! reports them together as a single configuration error.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::settings::Settings;
use crate::collaborators::compression::ZSTD_MAX_LEVEL;
use crate::error::{BackupError, BackupResult};
use crate::filter::{FilterKind, FilterRule};
use crate::models::{ArtifactNaming, BackupMode, DeletionMode};
use crate::retention::RetentionPolicy;

pub const DEFAULT_FULL_PREFIX: &str = "full";
pub const DEFAULT_SPLIT_PREFIX: &str = "split";
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Base extension of every artifact
const STREAM_EXTENSION: &str = "zfs";

/// Where artifacts are uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RemoteTarget {
    /// `s3://bucket/prefix/`
    S3 { url: String },
    /// `file:///dir`
    Local { path: PathBuf },
}

impl RemoteTarget {
    /// Parse an `s3://` or `file://` URL
    pub fn parse(url: &str) -> BackupResult<Self> {
        let url = url.trim();
        if let Some(rest) = url.strip_prefix("s3://") {
            let bucket = rest.split('/').next().unwrap_or_default();
            if bucket.is_empty() {
                return Err(BackupError::Config(format!(
                    "REMOTE_URL '{}' has no bucket",
                    url
                )));
            }
            return Ok(Self::S3 {
                url: url.to_string(),
            });
        }
        if let Some(path) = url.strip_prefix("file://") {
            if path.is_empty() {
                return Err(BackupError::Config(format!(
                    "REMOTE_URL '{}' has no path",
                    url
                )));
            }
            return Ok(Self::Local {
                path: PathBuf::from(path),
            });
        }
        Err(BackupError::Config(format!(
            "REMOTE_URL '{}' must start with s3:// or file://",
            url
        )))
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { url } => write!(f, "{}", url),
            Self::Local { path } => write!(f, "file://{}", path.display()),
        }
    }
}

/// Artifact extension for a zstd level (0 means uncompressed)
pub fn artifact_extension(zstd_level: i32) -> String {
    if zstd_level == 0 {
        STREAM_EXTENSION.to_string()
    } else {
        format!("{}.zst", STREAM_EXTENSION)
    }
}

/// The validated, immutable configuration of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupConfig {
    pub pool: String,
    pub mode: BackupMode,
    pub filter: FilterRule,
    /// `None` disables retention
    pub retention: Option<RetentionPolicy>,
    pub naming: ArtifactNaming,
    pub remote: RemoteTarget,
    pub zstd_level: i32,
    pub storage_class: Option<String>,
    pub notify_command: Option<String>,
    pub lock_file: Option<PathBuf>,
    pub zfs_bin: PathBuf,
    pub aws_bin: PathBuf,
}

impl BackupConfig {
    /// A whole-pool configuration with defaults for everything else
    pub fn new(pool: impl Into<String>, remote: RemoteTarget) -> Self {
        Self {
            pool: pool.into(),
            mode: BackupMode::Full,
            filter: FilterRule::None,
            retention: None,
            naming: ArtifactNaming::new(
                DEFAULT_FULL_PREFIX,
                DEFAULT_SPLIT_PREFIX,
                artifact_extension(DEFAULT_ZSTD_LEVEL),
            ),
            remote,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            storage_class: None,
            notify_command: None,
            lock_file: None,
            zfs_bin: PathBuf::from("zfs"),
            aws_bin: PathBuf::from("aws"),
        }
    }

    /// Resolve and validate settings
    pub fn from_settings(settings: &Settings) -> BackupResult<Self> {
        let mut errors: Vec<String> = Vec::new();

        let mut note = |result: BackupResult<()>| {
            if let Err(e) = result {
                errors.push(config_message(e));
            }
        };

        let pool = settings.pool.clone().unwrap_or_default();

        let mut mode = BackupMode::default();
        note(parse_into(settings.backup_mode.as_deref(), &mut mode));

        let mut deletion = DeletionMode::default();
        note(parse_into(settings.deletion_mode.as_deref(), &mut deletion));

        let mut filter_kind = FilterKind::default();
        note(parse_into(settings.filter_mode.as_deref(), &mut filter_kind));
        let patterns = settings.filter_list.clone().unwrap_or_default();

        let filter = if mode == BackupMode::Full {
            if filter_kind != FilterKind::None || !patterns.is_empty() {
                note(Err(BackupError::Config(format!(
                    "BACKUP_MODE=full backs up the whole pool and does not accept a filter \
                     (FILTER_MODE={}, FILTER_LIST=[{}])",
                    filter_kind,
                    patterns.join(", ")
                ))));
            }
            FilterRule::None
        } else {
            match FilterRule::new(filter_kind, &patterns) {
                Ok(rule) => rule,
                Err(e) => {
                    note(Err(e));
                    FilterRule::None
                }
            }
        };

        let retention = settings
            .max_backups
            .map(|keep| RetentionPolicy::new(keep, deletion));

        let remote = match settings.remote_url.as_deref() {
            Some(url) => match RemoteTarget::parse(url) {
                Ok(target) => Some(target),
                Err(e) => {
                    note(Err(e));
                    None
                }
            },
            None => {
                note(Err(BackupError::Config("REMOTE_URL is required".into())));
                None
            }
        };

        let zstd_level = settings.zstd_level.unwrap_or(DEFAULT_ZSTD_LEVEL);

        let naming = ArtifactNaming::new(
            settings
                .full_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_FULL_PREFIX.to_string()),
            settings
                .split_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_SPLIT_PREFIX.to_string()),
            artifact_extension(zstd_level),
        );

        let config = remote.map(|remote| Self {
            pool,
            mode,
            filter,
            retention,
            naming,
            remote,
            zstd_level,
            storage_class: settings.storage_class.clone().filter(|s| !s.is_empty()),
            notify_command: settings.notify_command.clone().filter(|s| !s.trim().is_empty()),
            lock_file: settings.lock_file.clone(),
            zfs_bin: settings.zfs_bin.clone().unwrap_or_else(|| PathBuf::from("zfs")),
            aws_bin: settings.aws_bin.clone().unwrap_or_else(|| PathBuf::from("aws")),
        });

        if let Some(config) = &config {
            errors.extend(config.problems());
        }

        match config {
            Some(config) if errors.is_empty() => Ok(config),
            _ => Err(BackupError::Config(errors.join("; "))),
        }
    }

    /// Re-check every invariant; the orchestrator runs this before any side effect
    pub fn validate(&self) -> BackupResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BackupError::Config(problems.join("; ")))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.pool.trim().is_empty() {
            problems.push("ZFS_POOL is required".to_string());
        } else if self.pool.contains('@') || self.pool.starts_with('/') || self.pool.ends_with('/') {
            problems.push(format!("ZFS_POOL '{}' is not a dataset name", self.pool));
        }

        if self.mode == BackupMode::Full && !self.filter.is_none() {
            problems.push(format!(
                "BACKUP_MODE=full does not accept a filter ({})",
                self.filter
            ));
        }
        if let Err(e) = FilterRule::new(self.filter.kind(), self.filter.patterns()) {
            problems.push(config_message(e));
        }

        if let Some(policy) = &self.retention {
            if policy.keep == 0 {
                problems.push(
                    "MAX_BACKUPS must be at least 1 (0 would delete the backup just sent)"
                        .to_string(),
                );
            }
        }

        for (name, prefix) in [
            ("FULL_PREFIX", &self.naming.full_prefix),
            ("SPLIT_PREFIX", &self.naming.split_prefix),
        ] {
            if prefix.is_empty() {
                problems.push(format!("{} must not be empty", name));
            } else if prefix.contains('/') {
                problems.push(format!("{} '{}' must not contain '/'", name, prefix));
            }
        }

        if !(0..=ZSTD_MAX_LEVEL).contains(&self.zstd_level) {
            problems.push(format!(
                "ZSTD_LEVEL {} is out of range 0..={}",
                self.zstd_level, ZSTD_MAX_LEVEL
            ));
        }

        problems
    }

    /// Root of the recursive snapshot
    pub fn snapshot_root(&self) -> &str {
        &self.pool
    }
}

fn parse_into<T>(value: Option<&str>, slot: &mut T) -> BackupResult<()>
where
    T: std::str::FromStr<Err = BackupError>,
{
    if let Some(raw) = value {
        *slot = raw.parse()?;
    }
    Ok(())
}

fn config_message(err: BackupError) -> String {
    match err {
        BackupError::Config(msg) => msg,
        other => other.to_string(),
    }
}
