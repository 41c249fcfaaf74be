//! Aggregators bucketed by block time.

use super::{Aggregator, GroupedActions, TransactionCounter};
use crate::time::truncate_time;
use crate::{ActionProperty, Block};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

fn bucket_key(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// [`GroupedActions`] per time bucket.
#[derive(Debug, Clone)]
pub struct TimeGroupedActions {
    duration: Duration,
    by: ActionProperty,
    buckets: BTreeMap<DateTime<Utc>, GroupedActions>,
}

impl TimeGroupedActions {
    pub fn new(duration: Duration, by: ActionProperty) -> Self {
        Self {
            duration,
            by,
            buckets: BTreeMap::new(),
        }
    }

    pub fn bucket(&self, time: &DateTime<Utc>) -> Option<&GroupedActions> {
        self.buckets.get(time)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&DateTime<Utc>, &GroupedActions)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Aggregator for TimeGroupedActions {
    fn add_block(&mut self, block: &dyn Block) {
        let key = truncate_time(block.time(), self.duration);
        self.buckets
            .entry(key)
            .or_insert_with(|| GroupedActions::new(self.by, false))
            .add_block(block);
    }

    fn result(&self) -> Value {
        let buckets: Map<String, Value> = self
            .buckets
            .iter()
            .map(|(time, grouped)| (bucket_key(time), grouped.result()))
            .collect();
        json!({
            "Duration": humantime::format_duration(self.duration).to_string(),
            "Buckets": buckets,
        })
    }
}

/// [`TransactionCounter`] per time bucket.
#[derive(Debug, Clone)]
pub struct TimeGroupedTransactionCount {
    duration: Duration,
    buckets: BTreeMap<DateTime<Utc>, TransactionCounter>,
}

impl TimeGroupedTransactionCount {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            buckets: BTreeMap::new(),
        }
    }

    /// Transactions in the bucket starting at `time`, zero when absent.
    pub fn get(&self, time: &DateTime<Utc>) -> u64 {
        self.buckets.get(time).map_or(0, TransactionCounter::count)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Aggregator for TimeGroupedTransactionCount {
    fn add_block(&mut self, block: &dyn Block) {
        let key = truncate_time(block.time(), self.duration);
        self.buckets.entry(key).or_default().add_block(block);
    }

    fn result(&self) -> Value {
        let buckets: Map<String, Value> = self
            .buckets
            .iter()
            .map(|(time, counter)| (bucket_key(time), json!(counter.count())))
            .collect();
        json!({
            "Duration": humantime::format_duration(self.duration).to_string(),
            "Buckets": buckets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_blocks::TestBlock;
    use chrono::TimeZone;

    // 2020-03-27T20:52:50Z
    const BASE: i64 = 1_585_342_370;

    fn blocks() -> Vec<TestBlock> {
        vec![
            TestBlock::new(1, BASE, &[("Payment", "a", "b")]),
            TestBlock::new(2, BASE + 5, &[("OfferCreate", "a", ""), ("Payment", "b", "c")]),
            TestBlock::new(3, BASE + 8, &[("OfferCreate", "c", "")]),
            TestBlock::new(4, BASE + 75, &[("OfferCancel", "a", "")]),
        ]
    }

    #[test]
    fn test_actions_bucketed_per_minute() {
        let mut aggregator = TimeGroupedActions::new(Duration::from_secs(60), ActionProperty::Name);
        for block in blocks() {
            aggregator.add_block(&block);
        }
        assert_eq!(aggregator.len(), 2);

        let first = Utc.with_ymd_and_hms(2020, 3, 27, 20, 52, 0).unwrap();
        let bucket = aggregator.bucket(&first).unwrap();
        assert_eq!(bucket.get("Payment"), 2);
        assert_eq!(bucket.get("OfferCreate"), 2);
        assert_eq!(bucket.transactions_count(), 4);

        let second = Utc.with_ymd_and_hms(2020, 3, 27, 20, 54, 0).unwrap();
        assert_eq!(aggregator.bucket(&second).unwrap().get("OfferCancel"), 1);
    }

    #[test]
    fn test_transactions_bucketed_per_minute() {
        let mut aggregator = TimeGroupedTransactionCount::new(Duration::from_secs(60));
        for block in blocks() {
            aggregator.add_block(&block);
        }
        let first = Utc.with_ymd_and_hms(2020, 3, 27, 20, 52, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2020, 3, 27, 20, 54, 0).unwrap();
        assert_eq!(aggregator.get(&first), 4);
        assert_eq!(aggregator.get(&second), 1);
        assert_eq!(aggregator.len(), 2);
    }

    #[test]
    fn test_result_keys_are_rfc3339() {
        let mut aggregator = TimeGroupedTransactionCount::new(Duration::from_secs(3600));
        for block in blocks() {
            aggregator.add_block(&block);
        }
        let result = aggregator.result();
        assert_eq!(result["Duration"], "1h");
        assert_eq!(result["Buckets"]["2020-03-27T20:00:00Z"], 5);
    }
}
