//! Run modes
//!
//! `BackupMode` fixes the unit granularity of a run, `DeletionMode` fixes
//! whether retention runs before or after each unit is sent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BackupError;

/// Granularity of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// One replicated stream of the whole pool (no filters allowed)
    #[default]
    Full,
    /// One stream per selected dataset
    Split,
}

impl BackupMode {
    /// Whether a run in this mode sends one unit per dataset
    pub fn is_per_dataset(&self) -> bool {
        matches!(self, Self::Split)
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Split => write!(f, "split"),
        }
    }
}

impl FromStr for BackupMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" | "whole_pool" | "pool" => Ok(Self::Full),
            "split" | "per_dataset" | "dataset" => Ok(Self::Split),
            other => Err(BackupError::Config(format!(
                "unknown backup mode '{}' (expected 'full' or 'split')",
                other
            ))),
        }
    }
}

/// When retention runs relative to the send of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeletionMode {
    /// Evict down to `keep - 1` before sending, freeing room for the new artifact
    Pre,
    /// Evict down to `keep` after a successful send
    #[default]
    Post,
}

impl fmt::Display for DeletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

impl FromStr for DeletionMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pre" | "pre_delete" | "before" => Ok(Self::Pre),
            "post" | "post_delete" | "after" => Ok(Self::Post),
            other => Err(BackupError::Config(format!(
                "unknown deletion mode '{}' (expected 'pre' or 'post')",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_mode_parse() {
        assert_eq!("full".parse::<BackupMode>().unwrap(), BackupMode::Full);
        assert_eq!("SPLIT".parse::<BackupMode>().unwrap(), BackupMode::Split);
        assert_eq!(
            "per_dataset".parse::<BackupMode>().unwrap(),
            BackupMode::Split
        );
        assert!("incremental".parse::<BackupMode>().unwrap_err().is_config());
    }

    #[test]
    fn test_deletion_mode_parse() {
        assert_eq!("pre".parse::<DeletionMode>().unwrap(), DeletionMode::Pre);
        assert_eq!(" Post ".parse::<DeletionMode>().unwrap(), DeletionMode::Post);
        assert!("sometimes".parse::<DeletionMode>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(BackupMode::default(), BackupMode::Full);
        assert_eq!(DeletionMode::default(), DeletionMode::Post);
        assert!(BackupMode::Split.is_per_dataset());
        assert!(!BackupMode::Full.is_per_dataset());
    }
}
