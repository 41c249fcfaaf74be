//! Stateful reducers over a stream of blocks.
//!
//! Each aggregator receives every surviving block of an ingestion run exactly
//! once through [`Aggregator::add_block`], in whatever order the pipeline
//! delivers them. Accumulation is therefore commutative by construction.
//! [`Aggregator::result`] is called once the stream ends.
//!
//! # Available Aggregators
//!
//! - [`TransactionCounter`] - total transactions
//! - [`ActionsCounter`] - frequency of action names, senders or receivers
//! - [`GroupedActions`] - top-K buckets of actions grouped by a property
//! - [`TimeGroupedActions`] - [`GroupedActions`] per time bucket
//! - [`TimeGroupedTransactionCount`] - transaction count per time bucket
//! - [`MissingBlocks`] - gap detection over an expected range

mod counter;
mod grouped;
mod missing;
mod registry;
mod time_grouped;

pub use counter::{ActionsCounter, TransactionCounter};
pub use grouped::{ActionGroup, DEFAULT_TOP_K, GroupedActions};
pub use missing::MissingBlocks;
pub use registry::{AggregatorFactory, AggregatorRegistry};
pub use time_grouped::{TimeGroupedActions, TimeGroupedTransactionCount};

use crate::Block;

/// A reducer consuming blocks into a summary statistic.
///
/// State is owned by the single thread driving the ingestion loop, so
/// implementations need no interior locking.
pub trait Aggregator: Send {
    /// Fold one block into the running state.
    fn add_block(&mut self, block: &dyn Block);

    /// Serializable summary of everything added so far.
    fn result(&self) -> serde_json::Value;
}

impl<A: Aggregator + ?Sized> Aggregator for Box<A> {
    fn add_block(&mut self, block: &dyn Block) {
        (**self).add_block(block)
    }

    fn result(&self) -> serde_json::Value {
        (**self).result()
    }
}

#[cfg(test)]
pub(crate) mod test_blocks {
    //! Minimal in-memory block used by the aggregator tests.

    use crate::{Action, Block};
    use chrono::{DateTime, TimeZone, Utc};

    pub struct TestBlock {
        pub number: u64,
        pub time: DateTime<Utc>,
        pub transactions: usize,
        pub actions: Vec<Action>,
    }

    impl TestBlock {
        pub fn new(number: u64, secs: i64, actions: &[(&str, &str, &str)]) -> Self {
            Self {
                number,
                time: Utc.timestamp_opt(secs, 0).unwrap(),
                transactions: actions.len(),
                actions: actions
                    .iter()
                    .map(|(name, sender, receiver)| Action::new(*name, *sender, *receiver))
                    .collect(),
            }
        }
    }

    impl Block for TestBlock {
        fn number(&self) -> u64 {
            self.number
        }

        fn time(&self) -> DateTime<Utc> {
            self.time
        }

        fn transactions_count(&self) -> usize {
            self.transactions
        }

        fn list_actions(&self) -> &[Action] {
            &self.actions
        }
    }
}
