//! Retention engine
//!
//! Bounds how many artifacts survive per namespace. `apply` lists the
//! remote, keeps keys containing the namespace that carry a well-formed
//! timestamp right after it, orders them oldest first and picks the excess
//! as victims. `evict` then deletes victims one by one; a failed delete is
//! recorded and the sweep continues.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::RemoteStore;
use crate::error::{BackupError, BackupResult};
use crate::models::{timestamp_token, DeletionMode};

/// An artifact already present in the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub key: String,
    /// `YYYYMMDD_HHMMSS` token embedded in the key
    pub timestamp: String,
    pub namespace: String,
}

impl RemoteArtifact {
    /// Interpret `key` as an artifact of `namespace`
    pub fn from_key(key: &str, namespace: &str) -> Option<Self> {
        let timestamp = timestamp_token(key, namespace)?;
        Some(Self {
            key: key.to_string(),
            timestamp: timestamp.to_string(),
            namespace: namespace.to_string(),
        })
    }
}

/// What one retention pass would delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionDecision {
    pub keep: usize,
    pub namespace: String,
    /// Oldest first
    pub victims: Vec<RemoteArtifact>,
    /// Artifacts that survive, oldest first
    pub kept: Vec<RemoteArtifact>,
}

impl RetentionDecision {
    pub fn is_noop(&self) -> bool {
        self.victims.is_empty()
    }
}

/// Outcome of [`RetentionEngine::evict`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub namespace: String,
    pub deleted: Vec<String>,
    /// `(key, error)` for each delete that failed
    pub failed: Vec<(String, String)>,
}

impl EvictionReport {
    pub fn evicted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Keep count plus delete ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep: usize,
    pub deletion: DeletionMode,
}

impl RetentionPolicy {
    pub fn new(keep: usize, deletion: DeletionMode) -> Self {
        Self { keep, deletion }
    }

    /// Keep count to apply before a send, if this policy deletes first
    ///
    /// One slot is freed for the incoming artifact.
    pub fn keep_before_send(&self) -> Option<usize> {
        match self.deletion {
            DeletionMode::Pre => Some(self.keep.saturating_sub(1)),
            DeletionMode::Post => None,
        }
    }

    /// Keep count to apply after a successful send, if this policy deletes last
    pub fn keep_after_send(&self) -> Option<usize> {
        match self.deletion {
            DeletionMode::Pre => None,
            DeletionMode::Post => Some(self.keep),
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keep {} ({}-delete)", self.keep, self.deletion)
    }
}

/// Chooses and deletes expired artifacts
pub struct RetentionEngine<'a> {
    remote: &'a dyn RemoteStore,
}

impl<'a> RetentionEngine<'a> {
    pub fn new(remote: &'a dyn RemoteStore) -> Self {
        Self { remote }
    }

    /// Decide which artifacts of `namespace` exceed `keep`
    ///
    /// `keep == 0` selects every artifact. Fails only if listing fails.
    pub fn apply(&self, namespace: &str, keep: usize) -> BackupResult<RetentionDecision> {
        let keys = self.remote.list().map_err(|e| {
            BackupError::Retention(format!(
                "listing {} for '{}' failed: {}",
                self.remote.location(),
                namespace,
                e
            ))
        })?;

        let decision = decide(&keys, namespace, keep);
        debug!(
            namespace,
            keep,
            matched = decision.kept.len() + decision.victims.len(),
            victims = decision.victims.len(),
            "Retention decision"
        );
        Ok(decision)
    }

    /// Delete every victim, continuing past individual failures
    pub fn evict(&self, decision: &RetentionDecision) -> EvictionReport {
        let mut report = EvictionReport {
            namespace: decision.namespace.clone(),
            ..Default::default()
        };

        for victim in &decision.victims {
            match self.remote.delete(&victim.key) {
                Ok(()) => {
                    info!(key = %victim.key, "Deleted expired backup");
                    report.deleted.push(victim.key.clone());
                }
                Err(e) if e.is_not_found() => {
                    debug!(key = %victim.key, "Expired backup already gone");
                    report.deleted.push(victim.key.clone());
                }
                Err(e) => {
                    warn!(key = %victim.key, error = %e, "Failed to delete expired backup");
                    report.failed.push((victim.key.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// `apply` then `evict`
    pub fn enforce(&self, namespace: &str, keep: usize) -> BackupResult<EvictionReport> {
        let decision = self.apply(namespace, keep)?;
        Ok(self.evict(&decision))
    }
}

/// Pure selection over a listing
pub fn decide<S: AsRef<str>>(keys: &[S], namespace: &str, keep: usize) -> RetentionDecision {
    let mut matched: Vec<RemoteArtifact> = keys
        .iter()
        .filter(|k| k.as_ref().contains(namespace))
        .filter_map(|k| RemoteArtifact::from_key(k.as_ref(), namespace))
        .collect();

    matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
    matched.dedup_by(|a, b| a.key == b.key);

    let excess = matched.len().saturating_sub(keep);
    let kept = matched.split_off(excess);

    RetentionDecision {
        keep,
        namespace: namespace.to_string(),
        victims: matched,
        kept,
    }
}
