//! Run timestamps and artifact naming
//!
//! Object keys must be bit-exact across runs for retention to find earlier
//! artifacts:
//!
//! - full:  `<full-prefix>_<pool-flat>_<YYYYMMDD_HHMMSS>.<ext>`
//! - split: `<split-prefix>_<dataset-flat>_<YYYYMMDD_HHMMSS>.<ext>`
//!
//! The retention namespace of a unit is everything up to and including the
//! underscore before the timestamp.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::dataset::flatten_name;
use super::mode::BackupMode;

/// strftime format of run timestamps; fixed width and sortable as a string
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of a formatted timestamp token
pub const TIMESTAMP_LEN: usize = 15;

/// The instant a run started, used as snapshot label and key suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunTimestamp(DateTime<Utc>);

impl RunTimestamp {
    /// Timestamp for a run starting now (second precision)
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap an existing instant, truncated to whole seconds
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let truncated = DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at);
        Self(truncated)
    }

    /// Parse a `YYYYMMDD_HHMMSS` token
    pub fn parse(token: &str) -> Option<Self> {
        if token.len() != TIMESTAMP_LEN {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).ok()?;
        Some(Self(DateTime::from_naive_utc_and_offset(naive, Utc)))
    }

    /// The formatted token, also used as the snapshot label
    pub fn label(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    /// The underlying instant
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Builds object keys and retention namespaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactNaming {
    /// Prefix for whole-pool artifacts
    pub full_prefix: String,
    /// Prefix for per-dataset artifacts
    pub split_prefix: String,
    /// Extension appended after the timestamp (without leading dot)
    pub extension: String,
}

impl ArtifactNaming {
    pub fn new(
        full_prefix: impl Into<String>,
        split_prefix: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            full_prefix: full_prefix.into(),
            split_prefix: split_prefix.into(),
            extension: extension.into(),
        }
    }

    fn prefix(&self, mode: BackupMode) -> &str {
        match mode {
            BackupMode::Full => &self.full_prefix,
            BackupMode::Split => &self.split_prefix,
        }
    }

    /// Retention namespace for a unit: `<prefix>_<flat-name>_`
    pub fn namespace(&self, mode: BackupMode, dataset_name: &str) -> String {
        format!("{}_{}_", self.prefix(mode), flatten_name(dataset_name))
    }

    /// Object key for a unit sent at `timestamp`
    pub fn object_key(
        &self,
        mode: BackupMode,
        dataset_name: &str,
        timestamp: &RunTimestamp,
    ) -> String {
        let mut key = self.namespace(mode, dataset_name);
        key.push_str(&timestamp.label());
        if !self.extension.is_empty() {
            key.push('.');
            key.push_str(&self.extension);
        }
        key
    }
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self::new("full", "split", "zfs.zst")
    }
}

/// Extract the timestamp token that follows `namespace` in `key`
///
/// Returns `None` when the namespace does not occur in the key or is not
/// followed by a well-formed timestamp.
pub fn timestamp_token<'a>(key: &'a str, namespace: &str) -> Option<&'a str> {
    let start = key.find(namespace)? + namespace.len();
    let token = key.get(start..start + TIMESTAMP_LEN)?;
    RunTimestamp::parse(token).map(|_| token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    fn ts(token: &str) -> RunTimestamp {
        RunTimestamp::parse(token).unwrap()
    }

    #[test]
    fn test_timestamp_label() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 4, 5, 6).unwrap();
        let stamp = RunTimestamp::from_datetime(at);
        assert_eq!(stamp.label(), "20250307_040506");
        assert_eq!(stamp.label().len(), TIMESTAMP_LEN);
    }

    #[test]
    fn test_timestamp_parse() {
        let stamp = ts("20251127_143022");
        assert_eq!(stamp.as_datetime().year(), 2025);
        assert_eq!(stamp.as_datetime().month(), 11);
        assert_eq!(stamp.as_datetime().hour(), 14);

        assert!(RunTimestamp::parse("20251127-143022").is_none());
        assert!(RunTimestamp::parse("2025112_143022").is_none());
        assert!(RunTimestamp::parse("20251327_143022").is_none());
    }

    #[test]
    fn test_object_keys() {
        let naming = ArtifactNaming::default();
        let stamp = ts("20250101_000000");

        assert_eq!(
            naming.object_key(BackupMode::Full, "tank", &stamp),
            "full_tank_20250101_000000.zfs.zst"
        );
        assert_eq!(
            naming.object_key(BackupMode::Split, "tank/home/alice", &stamp),
            "split_tank-home-alice_20250101_000000.zfs.zst"
        );
    }

    #[test]
    fn test_namespace_is_key_prefix() {
        let naming = ArtifactNaming::new("daily", "ds", "raw");
        let stamp = ts("20250101_000000");
        let key = naming.object_key(BackupMode::Split, "tank/home", &stamp);
        let namespace = naming.namespace(BackupMode::Split, "tank/home");

        assert_eq!(namespace, "ds_tank-home_");
        assert!(key.starts_with(&namespace));
        assert_eq!(timestamp_token(&key, &namespace), Some("20250101_000000"));
    }

    #[test]
    fn test_namespace_does_not_match_sibling() {
        let naming = ArtifactNaming::default();
        let stamp = ts("20250101_000000");
        let sibling = naming.object_key(BackupMode::Split, "tank/home-old", &stamp);
        let namespace = naming.namespace(BackupMode::Split, "tank/home");

        assert!(!sibling.contains(&namespace));
    }

    #[test]
    fn test_timestamp_token_rejects_garbage() {
        assert_eq!(timestamp_token("full_tank_latest.zfs.zst", "full_tank_"), None);
        assert_eq!(timestamp_token("full_tank_2025.zst", "full_tank_"), None);
        assert_eq!(timestamp_token("other_20250101_000000", "full_tank_"), None);
    }
}
