//! Core types for chainstat: the chain-independent block model, action
//! counting, the aggregator framework and batch file helpers.
//!
//! This crate provides:
//! - [`Block`] / [`Action`] - the common shape every chain decodes into
//! - [`ActionsCount`] - mergeable per-key frequency map
//! - [`aggregate`] - reducers over block streams and their registry
//! - [`files`] - batch file naming and transparent gzip I/O
//! - [`time`] - duration parsing and time bucketing
//! - [`metrics`] - Prometheus helpers
//! - Shared error types

mod actions;
pub mod aggregate;
mod block;
mod error;
pub mod files;
pub mod metrics;
pub mod time;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Number of blocks stored per batch file.
pub const BATCH_SIZE: u64 = 100_000;

pub use actions::ActionsCount;
pub use aggregate::{Aggregator, AggregatorRegistry, MissingBlocks};
pub use block::{Action, ActionProperty, Block};
pub use error::{Error, Result};
