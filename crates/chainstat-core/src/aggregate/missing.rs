//! Gap detection over an expected block range.

use super::Aggregator;
use crate::Block;
use serde_json::json;
use std::collections::HashSet;

/// Records which block numbers were observed and reports the ones missing
/// from `[start, end]`.
///
/// A zero bound means "unbounded" on that side; the report then uses the
/// smallest (or largest) number observed instead.
#[derive(Debug, Clone, Default)]
pub struct MissingBlocks {
    start: u64,
    end: u64,
    seen: HashSet<u64>,
}

impl MissingBlocks {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            seen: HashSet::new(),
        }
    }

    /// Mark `number` as observed.
    pub fn insert(&mut self, number: u64) {
        if self.in_range(number) {
            self.seen.insert(number);
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    fn in_range(&self, number: u64) -> bool {
        (self.start == 0 || number >= self.start) && (self.end == 0 || number <= self.end)
    }

    /// Effective `[low, high]` bounds, or `None` if nothing can be inferred.
    fn bounds(&self) -> Option<(u64, u64)> {
        let low = if self.start != 0 {
            self.start
        } else {
            *self.seen.iter().min()?
        };
        let high = if self.end != 0 {
            self.end
        } else {
            *self.seen.iter().max()?
        };
        Some((low, high))
    }

    /// Sorted list of numbers in range that were never observed.
    pub fn missing(&self) -> Vec<u64> {
        match self.bounds() {
            Some((low, high)) if low <= high => (low..=high)
                .filter(|number| !self.seen.contains(number))
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Aggregator for MissingBlocks {
    fn add_block(&mut self, block: &dyn Block) {
        self.insert(block.number());
    }

    fn result(&self) -> serde_json::Value {
        json!(self.missing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_range_has_no_gaps() {
        let mut missing = MissingBlocks::new(54387321, 54387329);
        for number in 54387300..54387340 {
            missing.insert(number);
        }
        assert!(missing.missing().is_empty());
        assert_eq!(missing.seen_count(), 9);
    }

    #[test]
    fn test_single_gap() {
        let mut missing = MissingBlocks::new(123, 126);
        for number in [123, 125, 126] {
            missing.insert(number);
        }
        assert_eq!(missing.missing(), vec![124]);
        assert_eq!(missing.result(), json!([124]));
    }

    #[test]
    fn test_unbounded_range_uses_observed_extremes() {
        let mut missing = MissingBlocks::new(0, 0);
        for number in [10, 14, 11] {
            missing.insert(number);
        }
        assert_eq!(missing.missing(), vec![12, 13]);
    }

    #[test]
    fn test_half_bounded_range() {
        let mut missing = MissingBlocks::new(8, 0);
        for number in [10, 11] {
            missing.insert(number);
        }
        assert_eq!(missing.missing(), vec![8, 9]);
    }

    #[test]
    fn test_nothing_seen_and_unbounded() {
        let missing = MissingBlocks::new(0, 0);
        assert!(missing.missing().is_empty());
    }

    #[test]
    fn test_nothing_seen_in_bounded_range() {
        let missing = MissingBlocks::new(5, 7);
        assert_eq!(missing.missing(), vec![5, 6, 7]);
    }
}
