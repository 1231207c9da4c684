use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the engine trades ordering strictness against throughput.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriorityPolicy {
    /// Volatile specs run strictly sequentially in (priority, name) order.
    VolatileFirst,
    /// Volatile specs may run in parallel, still all before non-volatile.
    Balanced,
    /// Same as balanced; selects the extended catalogue by convention.
    Comprehensive,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        PriorityPolicy::VolatileFirst
    }
}

/// Per-run selection and resource bounds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CollectionProfile {
    /// When false only specs of priority <= 3 are considered.
    #[serde(default)]
    pub extended: bool,
    /// Non-empty include acts as a whitelist; exclude is then subtracted.
    #[serde(default)]
    pub include: BTreeSet<String>,
    #[serde(default)]
    pub exclude: BTreeSet<String>,
    /// Profile-wide wall clock in seconds; pending specs are cancelled
    /// once it expires.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub priority_policy: PriorityPolicy,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_parallel() -> usize {
    4
}

impl Default for CollectionProfile {
    fn default() -> Self {
        CollectionProfile {
            extended: false,
            include: BTreeSet::new(),
            exclude: BTreeSet::new(),
            timeout_secs: default_timeout_secs(),
            priority_policy: PriorityPolicy::default(),
            allow_network: false,
            max_parallel: default_max_parallel(),
        }
    }
}

impl CollectionProfile {
    pub fn extended() -> Self {
        CollectionProfile {
            extended: true,
            priority_policy: PriorityPolicy::Comprehensive,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether the named spec survives include/exclude filtering.
    pub fn selects(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.contains(name) {
            return false;
        }
        !self.exclude.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_whitelists_then_exclude_subtracts() {
        let mut profile = CollectionProfile::default();
        profile.include.insert("a".into());
        profile.include.insert("b".into());
        profile.exclude.insert("b".into());

        assert!(profile.selects("a"));
        assert!(!profile.selects("b"));
        assert!(!profile.selects("c"));
    }

    #[test]
    fn test_empty_include_selects_everything_not_excluded() {
        let mut profile = CollectionProfile::default();
        profile.exclude.insert("noisy".into());
        assert!(profile.selects("anything"));
        assert!(!profile.selects("noisy"));
    }

    #[test]
    fn test_defaults() {
        let profile = CollectionProfile::default();
        assert!(!profile.extended);
        assert_eq!(profile.max_parallel, 4);
        assert_eq!(profile.priority_policy, PriorityPolicy::VolatileFirst);
        assert_eq!(profile.timeout(), Duration::from_secs(300));
    }
}
