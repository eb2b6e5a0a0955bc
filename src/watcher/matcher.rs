//! Filter matching policies.
//!
//! The two policies pick different click targets for the same filter, so
//! exactly one of them is active for a watcher. Which one is decided at
//! deployment through `watcher.matching` or the mode's default.

use serde::{Deserialize, Serialize};

/// Decides whether a product name satisfies the configured filter.
pub trait FilterMatcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn matches(&self, filter: &str, candidate: &str) -> bool;
}

/// Case-insensitive substring containment after trimming both sides.
/// A blank filter matches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainsMatcher;

impl FilterMatcher for ContainsMatcher {
    fn name(&self) -> &'static str {
        "contains"
    }

    fn matches(&self, filter: &str, candidate: &str) -> bool {
        let filter = filter.trim().to_lowercase();
        if filter.is_empty() {
            return false;
        }
        candidate.trim().to_lowercase().contains(&filter)
    }
}

/// Exact, case-sensitive equality after whitespace normalization.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatcher;

impl FilterMatcher for ExactMatcher {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn matches(&self, filter: &str, candidate: &str) -> bool {
        normalize_whitespace(filter) == normalize_whitespace(candidate)
    }
}

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A filter that is empty or whitespace-only turns every scan pass into a no-op.
pub fn is_active_filter(filter: &str) -> bool {
    !filter.trim().is_empty()
}

/// Matching policy selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    Contains,
    Exact,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn FilterMatcher> {
        match self {
            MatchPolicy::Contains => Box::new(ContainsMatcher),
            MatchPolicy::Exact => Box::new(ExactMatcher),
        }
    }
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contains" => Ok(MatchPolicy::Contains),
            "exact" => Ok(MatchPolicy::Exact),
            other => Err(format!(
                "unknown match policy '{}' (expected contains or exact)",
                other
            )),
        }
    }
}
