//! Dataset model
//!
//! A dataset is a node of the source storage tree, named by its
//! slash-separated path from the pool root (e.g. `tank/home/alice`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between path segments in dataset names
pub const SEGMENT_SEPARATOR: char = '/';

/// Character that replaces [`SEGMENT_SEPARATOR`] in object keys
pub const KEY_SEPARATOR_REWRITE: char = '-';

/// A dataset in the source tree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    name: String,
}

impl Dataset {
    /// Create a dataset from its full name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The full hierarchical name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name with path separators rewritten, safe to embed in a flat object key
    pub fn flat_name(&self) -> String {
        flatten_name(&self.name)
    }

    /// Reference to this dataset's snapshot with the given label
    pub fn snapshot_ref(&self, label: &str) -> String {
        format!("{}@{}", self.name, label)
    }

    /// Whether `pattern` occurs in the name as whole path segments
    ///
    /// The pattern must start at the beginning of the name or right after a
    /// separator, and end at a separator or the end of the name. `home`
    /// matches `tank/home` and `tank/home/alice` but not `tank/homes`.
    pub fn matches_segment(&self, pattern: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }

        let mut segment_starts = std::iter::once(0).chain(
            self.name
                .match_indices(SEGMENT_SEPARATOR)
                .map(|(idx, sep)| idx + sep.len()),
        );

        segment_starts.any(|start| {
            let rest = &self.name[start..];
            rest.starts_with(pattern)
                && (rest.len() == pattern.len()
                    || rest[pattern.len()..].starts_with(SEGMENT_SEPARATOR))
        })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Dataset {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Rewrite path separators so the name contains no nested "directories"
pub fn flatten_name(name: &str) -> String {
    name.replace(SEGMENT_SEPARATOR, &KEY_SEPARATOR_REWRITE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_name() {
        assert_eq!(Dataset::new("tank").flat_name(), "tank");
        assert_eq!(Dataset::new("tank/home/alice").flat_name(), "tank-home-alice");
    }

    #[test]
    fn test_snapshot_ref() {
        let ds = Dataset::new("tank/home");
        assert_eq!(ds.snapshot_ref("20250101_120000"), "tank/home@20250101_120000");
    }

    #[test]
    fn test_segment_match() {
        let ds = Dataset::new("pool/docs/photos");
        assert!(ds.matches_segment("docs"));
        assert!(ds.matches_segment("photos"));
        assert!(ds.matches_segment("pool"));
        assert!(ds.matches_segment("docs/photos"));
        assert!(!ds.matches_segment("doc"));
        assert!(!ds.matches_segment("hotos"));
        assert!(!ds.matches_segment("ocs/pho"));
        assert!(!ds.matches_segment(""));
    }

    #[test]
    fn test_segment_match_later_occurrence() {
        // first occurrence is mid-segment, second is a whole segment
        let ds = Dataset::new("pool/xhome/home");
        assert!(ds.matches_segment("home"));

        let ds = Dataset::new("pool/homes");
        assert!(!ds.matches_segment("home"));
    }
}
