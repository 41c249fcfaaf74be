//! Scalar and per-key counters.

use super::Aggregator;
use crate::{ActionProperty, ActionsCount, Block};
use serde_json::json;

/// Sums the transaction count of every block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionCounter {
    count: u64,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn merge(&mut self, other: &TransactionCounter) {
        self.count += other.count;
    }
}

impl Aggregator for TransactionCounter {
    fn add_block(&mut self, block: &dyn Block) {
        self.count += block.transactions_count() as u64;
    }

    fn result(&self) -> serde_json::Value {
        json!(self.count)
    }
}

/// Counts actions keyed by one of their properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionsCounter {
    by: ActionProperty,
    counts: ActionsCount,
}

impl ActionsCounter {
    pub fn new(by: ActionProperty) -> Self {
        Self {
            by,
            counts: ActionsCount::new(),
        }
    }

    pub fn by(&self) -> ActionProperty {
        self.by
    }

    pub fn counts(&self) -> &ActionsCount {
        &self.counts
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key)
    }

    /// Fold the counts of `other` into `self`.
    ///
    /// Both counters must group by the same property for the result to be
    /// meaningful.
    pub fn merge(&mut self, other: &ActionsCounter) {
        debug_assert_eq!(self.by, other.by);
        self.counts.merge(&other.counts);
    }
}

impl Aggregator for ActionsCounter {
    fn add_block(&mut self, block: &dyn Block) {
        for action in block.list_actions() {
            self.counts.increment(self.by.of(action));
        }
    }

    fn result(&self) -> serde_json::Value {
        json!({
            "By": self.by,
            "UniqueCount": self.counts.unique_count(),
            "TotalCount": self.counts.total_count(),
            "Actions": self.counts,
        })
    }
}
