//! Dataset filtering
//!
//! Evaluates an include/exclude rule set against the flat list of datasets
//! found under the pool root, producing the working set of a split run.
//!
//! Patterns match whole path segments only: `home` selects `tank/home` and
//! `tank/home/alice`, never `tank/homes`. There is no glob or regex
//! support; patterns are taken literally after trimming whitespace.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BackupError, BackupResult};
use crate::models::Dataset;

/// Kind of filter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    None,
    Include,
    Exclude,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Include => write!(f, "include"),
            Self::Exclude => write!(f, "exclude"),
        }
    }
}

impl FromStr for FilterKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            other => Err(BackupError::Config(format!(
                "unknown filter mode '{}' (expected 'none', 'include' or 'exclude')",
                other
            ))),
        }
    }
}

/// A validated filter rule
///
/// `None` carries no patterns; `Include` and `Exclude` always carry at
/// least one non-blank, trimmed pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "patterns", rename_all = "lowercase")]
pub enum FilterRule {
    #[default]
    None,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl FilterRule {
    /// Build a rule, enforcing `None` ⇔ no patterns
    pub fn new<S: AsRef<str>>(kind: FilterKind, patterns: &[S]) -> BackupResult<Self> {
        let trimmed: Vec<String> = patterns
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .collect();

        if trimmed.iter().any(|p| p.is_empty()) {
            return Err(BackupError::Config(
                "filter list contains an empty pattern".into(),
            ));
        }

        match kind {
            FilterKind::None if trimmed.is_empty() => Ok(Self::None),
            FilterKind::None => Err(BackupError::Config(format!(
                "filter patterns given ({}) but filter mode is 'none'",
                trimmed.join(", ")
            ))),
            _ if trimmed.is_empty() => Err(BackupError::Config(format!(
                "filter mode '{}' requires at least one pattern",
                kind
            ))),
            FilterKind::Include => Ok(Self::Include(trimmed)),
            FilterKind::Exclude => Ok(Self::Exclude(trimmed)),
        }
    }

    /// Parse a comma-separated pattern list
    pub fn parse(kind: &str, list: &str) -> BackupResult<Self> {
        let kind: FilterKind = kind.parse()?;
        let patterns = split_pattern_list(list);
        Self::new(kind, &patterns)
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Self::None => FilterKind::None,
            Self::Include(_) => FilterKind::Include,
            Self::Exclude(_) => FilterKind::Exclude,
        }
    }

    pub fn patterns(&self) -> &[String] {
        match self {
            Self::None => &[],
            Self::Include(p) | Self::Exclude(p) => p,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Include(p) => write!(f, "include [{}]", p.join(", ")),
            Self::Exclude(p) => write!(f, "exclude [{}]", p.join(", ")),
        }
    }
}

/// Split a comma-separated list, dropping blank entries
pub fn split_pattern_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Apply a rule to the dataset list
///
/// - `None` returns the input unchanged.
/// - `Include` returns the union of every pattern's matches, deduplicated
///   and sorted by name.
/// - `Exclude` removes every match and keeps the input order.
///
/// An empty result is an `EmptySelection` error.
pub fn select(datasets: &[Dataset], rule: &FilterRule) -> BackupResult<Vec<Dataset>> {
    let selected = match rule {
        FilterRule::None => datasets.to_vec(),
        FilterRule::Include(patterns) => {
            let mut union = BTreeSet::new();
            for pattern in patterns {
                let pattern = pattern.trim();
                union.extend(
                    datasets
                        .iter()
                        .filter(|ds| ds.matches_segment(pattern))
                        .cloned(),
                );
            }
            union.into_iter().collect()
        }
        FilterRule::Exclude(patterns) => {
            let mut remaining = datasets.to_vec();
            for pattern in patterns {
                let pattern = pattern.trim();
                remaining.retain(|ds| !ds.matches_segment(pattern));
            }
            remaining
        }
    };

    if selected.is_empty() {
        return Err(BackupError::EmptySelection(format!(
            "filter {} matched nothing among {} dataset(s)",
            rule,
            datasets.len()
        )));
    }

    tracing::debug!(
        filter = %rule,
        candidates = datasets.len(),
        selected = selected.len(),
        "Applied dataset filter"
    );

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn datasets(names: &[&str]) -> Vec<Dataset> {
        names.iter().map(|n| Dataset::new(*n)).collect()
    }

    fn names(selected: &[Dataset]) -> Vec<&str> {
        selected.iter().map(|d| d.name()).collect()
    }

    #[test]
    fn test_none_is_identity() {
        let input = datasets(&["pool/b", "pool", "pool/a"]);
        let selected = select(&input, &FilterRule::None).unwrap();
        assert_eq!(selected, input);
    }

    #[test]
    fn test_include_segment_match() {
        let input = datasets(&["pool/home", "pool/tmp", "pool/docs/photos"]);
        let rule = FilterRule::new(FilterKind::Include, &["home", "docs"]).unwrap();

        let selected = select(&input, &rule).unwrap();
        assert_eq!(names(&selected), vec!["pool/docs/photos", "pool/home"]);
    }

    #[test]
    fn test_include_deduplicates() {
        let input = datasets(&["pool/home/alice", "pool/home"]);
        let rule = FilterRule::new(FilterKind::Include, &["home", "alice"]).unwrap();

        let selected = select(&input, &rule).unwrap();
        assert_eq!(names(&selected), vec!["pool/home", "pool/home/alice"]);
    }

    #[test]
    fn test_include_is_not_substring() {
        let input = datasets(&["pool/homes", "pool/myhome"]);
        let rule = FilterRule::new(FilterKind::Include, &["home"]).unwrap();

        let err = select(&input, &rule).unwrap_err();
        assert!(matches!(err, BackupError::EmptySelection(_)));
    }

    #[test]
    fn test_exclude_preserves_order() {
        let input = datasets(&["pool/z", "pool/tmp", "pool/a", "pool/tmp/cache"]);
        let rule = FilterRule::new(FilterKind::Exclude, &[" tmp "]).unwrap();

        let selected = select(&input, &rule).unwrap();
        assert_eq!(names(&selected), vec!["pool/z", "pool/a"]);
    }

    #[test]
    fn test_exclude_everything_is_empty_selection() {
        let input = datasets(&["pool"]);
        let rule = FilterRule::new(FilterKind::Exclude, &["pool"]).unwrap();

        assert!(matches!(
            select(&input, &rule),
            Err(BackupError::EmptySelection(_))
        ));
    }

    #[test]
    fn test_rule_invariants() {
        assert!(FilterRule::new::<&str>(FilterKind::None, &[]).unwrap().is_none());
        assert!(FilterRule::new(FilterKind::None, &["home"]).unwrap_err().is_config());
        assert!(FilterRule::new::<&str>(FilterKind::Include, &[])
            .unwrap_err()
            .is_config());
        assert!(FilterRule::new(FilterKind::Exclude, &["  "])
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn test_parse_unknown_kind() {
        let err = FilterRule::parse("glob", "home").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_parse_list() {
        let rule = FilterRule::parse("include", "home, docs ,,").unwrap();
        assert_eq!(rule.patterns(), &["home".to_string(), "docs".to_string()]);
        assert_eq!(rule.kind(), FilterKind::Include);
    }

    fn dataset_names() -> impl Strategy<Value = Vec<Dataset>> {
        prop::collection::vec("pool(/[a-c]{1,2}){0,3}", 1..12)
            .prop_map(|names| names.into_iter().map(Dataset::new).collect())
    }

    fn pattern_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-c]{1,2}", 1..4)
    }

    proptest! {
        #[test]
        fn prop_none_is_identity(input in dataset_names()) {
            let selected = select(&input, &FilterRule::None).unwrap();
            prop_assert_eq!(selected, input);
        }

        #[test]
        fn prop_include_matches_some_pattern(input in dataset_names(), patterns in pattern_list()) {
            let rule = FilterRule::new(FilterKind::Include, &patterns).unwrap();
            let expected: BTreeSet<Dataset> = input
                .iter()
                .filter(|ds| patterns.iter().any(|p| ds.matches_segment(p)))
                .cloned()
                .collect();

            match select(&input, &rule) {
                Ok(selected) => {
                    let as_set: BTreeSet<Dataset> = selected.iter().cloned().collect();
                    prop_assert_eq!(as_set.len(), selected.len());
                    prop_assert_eq!(as_set, expected);
                }
                Err(BackupError::EmptySelection(_)) => prop_assert!(expected.is_empty()),
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }

        #[test]
        fn prop_exclude_removes_exactly_matches(input in dataset_names(), patterns in pattern_list()) {
            let rule = FilterRule::new(FilterKind::Exclude, &patterns).unwrap();
            let expected: Vec<Dataset> = input
                .iter()
                .filter(|ds| !patterns.iter().any(|p| ds.matches_segment(p)))
                .cloned()
                .collect();

            match select(&input, &rule) {
                Ok(selected) => prop_assert_eq!(selected, expected),
                Err(BackupError::EmptySelection(_)) => prop_assert!(expected.is_empty()),
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }
    }
}
