//! Actions grouped into named buckets.

use super::Aggregator;
use crate::{Action, ActionProperty, ActionsCount, Block};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

/// Number of buckets kept in the output of [`GroupedActions`].
pub const DEFAULT_TOP_K: usize = 1000;

/// One bucket of [`GroupedActions`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionGroup {
    pub name: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<ActionsCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub senders: Option<ActionsCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receivers: Option<ActionsCount>,
}

impl ActionGroup {
    fn new(name: &str, detailed: bool) -> Self {
        let details = || detailed.then(ActionsCount::new);
        Self {
            name: name.to_string(),
            count: 0,
            names: details(),
            senders: details(),
            receivers: details(),
        }
    }

    fn add(&mut self, action: &Action) {
        self.count += 1;
        if let Some(names) = &mut self.names {
            names.increment(&action.name);
        }
        if let Some(senders) = &mut self.senders {
            senders.increment(&action.sender);
        }
        if let Some(receivers) = &mut self.receivers {
            receivers.increment(&action.receiver);
        }
    }
}

/// Groups actions by a property, optionally with per-group breakdowns.
///
/// The output keeps only the `top_k` largest groups, sorted by descending
/// count; groups with equal counts are ordered by ascending key.
#[derive(Debug, Clone)]
pub struct GroupedActions {
    by: ActionProperty,
    detailed: bool,
    top_k: usize,
    groups: HashMap<String, ActionGroup>,
    blocks_count: u64,
    transactions_count: u64,
    actions_count: u64,
}

impl GroupedActions {
    pub fn new(by: ActionProperty, detailed: bool) -> Self {
        Self {
            by,
            detailed,
            top_k: DEFAULT_TOP_K,
            groups: HashMap::new(),
            blocks_count: 0,
            transactions_count: 0,
            actions_count: 0,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Count of the group keyed `key`, zero when absent.
    pub fn get(&self, key: &str) -> u64 {
        self.groups.get(key).map_or(0, |group| group.count)
    }

    pub fn group(&self, key: &str) -> Option<&ActionGroup> {
        self.groups.get(key)
    }

    pub fn blocks_count(&self) -> u64 {
        self.blocks_count
    }

    pub fn transactions_count(&self) -> u64 {
        self.transactions_count
    }

    pub fn unique_count(&self) -> usize {
        self.groups.len()
    }

    pub fn total_count(&self) -> u64 {
        self.actions_count
    }

    /// The `k` largest groups, by descending count then ascending key.
    pub fn top(&self, k: usize) -> Vec<&ActionGroup> {
        let mut groups: Vec<&ActionGroup> = self.groups.values().collect();
        groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        groups.truncate(k);
        groups
    }
}

impl Aggregator for GroupedActions {
    fn add_block(&mut self, block: &dyn Block) {
        self.blocks_count += 1;
        self.transactions_count += block.transactions_count() as u64;

        for action in block.list_actions() {
            let key = self.by.of(action);
            if !self.groups.contains_key(key) {
                self.groups
                    .insert(key.to_string(), ActionGroup::new(key, self.detailed));
            }
            if let Some(group) = self.groups.get_mut(key) {
                group.add(action);
            }
            self.actions_count += 1;
        }
    }

    fn result(&self) -> serde_json::Value {
        json!({
            "By": self.by,
            "Detailed": self.detailed,
            "BlocksCount": self.blocks_count,
            "TransactionsCount": self.transactions_count,
            "UniqueCount": self.unique_count(),
            "TotalCount": self.actions_count,
            "Actions": self.top(self.top_k),
        })
    }
}
