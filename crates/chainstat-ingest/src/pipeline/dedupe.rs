//! In-memory deduplication and range filtering of block numbers.
//!
//! Duplicates are detected before the range filter, so a block outside the
//! range that appears twice still counts as a duplicate.

use serde::Serialize;
use std::collections::HashSet;

/// Outcome of [`DedupeFilter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First occurrence within the range; forward it.
    Accepted,
    /// Number seen before.
    Duplicate,
    /// First occurrence, but outside `[start, end]`.
    OutOfRange,
}

/// Counters kept by the dedup stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DedupeStats {
    pub received: u64,
    pub duplicates: u64,
    pub filtered: u64,
    pub accepted: u64,
}

/// Tracks every block number seen in one ingestion run.
///
/// A bound of `0` means unbounded on that side.
#[derive(Debug, Default)]
pub struct DedupeFilter {
    seen: HashSet<u64>,
    start: u64,
    end: u64,
    stats: DedupeStats,
}

impl DedupeFilter {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    fn in_range(&self, number: u64) -> bool {
        (self.start == 0 || number >= self.start) && (self.end == 0 || number <= self.end)
    }

    /// Record `number` and decide whether its block goes downstream.
    pub fn check(&mut self, number: u64) -> Admission {
        self.stats.received += 1;
        if !self.seen.insert(number) {
            self.stats.duplicates += 1;
            return Admission::Duplicate;
        }
        if !self.in_range(number) {
            self.stats.filtered += 1;
            return Admission::OutOfRange;
        }
        self.stats.accepted += 1;
        Admission::Accepted
    }

    pub fn stats(&self) -> &DedupeStats {
        &self.stats
    }

    pub fn into_stats(self) -> DedupeStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_accepted() {
        let mut filter = DedupeFilter::new(0, 0);
        assert_eq!(filter.check(7), Admission::Accepted);
        assert_eq!(filter.check(7), Admission::Duplicate);
        assert_eq!(filter.check(8), Admission::Accepted);
        assert_eq!(filter.check(7), Admission::Duplicate);

        let stats = filter.stats();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.duplicates, 2);
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let mut filter = DedupeFilter::new(10, 20);
        assert_eq!(filter.check(9), Admission::OutOfRange);
        assert_eq!(filter.check(10), Admission::Accepted);
        assert_eq!(filter.check(20), Admission::Accepted);
        assert_eq!(filter.check(21), Admission::OutOfRange);
        assert_eq!(filter.stats().filtered, 2);
    }

    #[test]
    fn test_zero_bound_is_open() {
        let mut filter = DedupeFilter::new(0, 5);
        assert_eq!(filter.check(0), Admission::Accepted);
        assert_eq!(filter.check(6), Admission::OutOfRange);

        let mut filter = DedupeFilter::new(5, 0);
        assert_eq!(filter.check(4), Admission::OutOfRange);
        assert_eq!(filter.check(u64::MAX), Admission::Accepted);
    }

    #[test]
    fn test_duplicate_checked_before_range() {
        let mut filter = DedupeFilter::new(10, 20);
        assert_eq!(filter.check(3), Admission::OutOfRange);
        assert_eq!(filter.check(3), Admission::Duplicate);

        let stats = filter.into_stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.duplicates, 1);
    }
}
