//! Frequency map of action keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Count of actions per key (action name, sender or receiver).
///
/// Keys are kept ordered so serialized output is reproducible. Merging is
/// associative and commutative: merging partial counts gives the same map as
/// counting the union of their inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionsCount {
    actions: BTreeMap<String, u64>,
}

impl ActionsCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, count: u64) {
        // Avoid allocating a key for the common "already present" case.
        if let Some(value) = self.actions.get_mut(key) {
            *value += count;
        } else {
            self.actions.insert(key.to_string(), count);
        }
    }

    /// Count for `key`, zero when never seen.
    pub fn get(&self, key: &str) -> u64 {
        self.actions.get(key).copied().unwrap_or(0)
    }

    /// Add every count of `other` into `self`.
    pub fn merge(&mut self, other: &ActionsCount) {
        for (key, value) in &other.actions {
            self.add(key, *value);
        }
    }

    /// Number of distinct keys.
    pub fn unique_count(&self) -> usize {
        self.actions.len()
    }

    /// Sum of all counts.
    pub fn total_count(&self) -> u64 {
        self.actions.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.actions.iter().map(|(key, value)| (key.as_str(), *value))
    }
}

impl<'a> FromIterator<&'a str> for ActionsCount {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut counts = Self::new();
        for key in iter {
            counts.increment(key);
        }
        counts
    }
}
