//! Fetching, ingestion and bulk statistics for chainstat.
//!
//! # Modules
//!
//! - [`chains`] - Per-chain adapters (XRP, Tezos, EOS)
//! - [`fetch`] - Batched worker-pool and windowed-connection fetch engines
//! - [`pipeline`] - Multi-file streaming ingestion with deduplication
//! - [`bulk`] - Declarative multi-aggregator runs
//! - [`commands`] - Offline operations over stored files
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Blockchain    │  XRP (websocket), Tezos / EOS (HTTP)
//! └────────┬────────┘
//!          │ BatchFetcher / WindowedFetcher
//!          ▼
//! ┌─────────────────┐
//! │   Batch files   │  <base>-<first>--<last>.jsonl.gz
//! └────────┬────────┘
//!          │ stream_blocks
//!          ▼
//! ┌─────────────────┐
//! │   BlockStream   │  decoded, deduplicated, range-filtered
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Aggregators   │  counters, groupings, time buckets, gaps
//! └─────────────────┘
//! ```

pub mod bulk;
pub mod chains;
pub mod commands;
pub mod error;
pub mod fetch;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, Result};

pub use bulk::{BulkConfig, BulkReport, BulkRunner, ProcessorConfig};
pub use chains::{Blockchain, Eos, MaybeInline, Tezos, Transfer, Xrp};
pub use fetch::{
    BatchFetchConfig, BatchFetcher, FetchStats, WindowedFetchConfig, WindowedFetcher, batches,
};
pub use pipeline::{BlockStream, IngestStats, PipelineConfig, stream_blocks};
