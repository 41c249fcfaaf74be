//! Range fetch engines.
//!
//! Both engines split `[start, end]` into fixed-size batches, newest first,
//! and write one `<output>-<first>--<last>.<ext>` file per batch. Identifiers
//! that could not be fetched end up in the batch's `-errors` file.
//!
//! - [`BatchFetcher`] - worker pool over a request/response [`Transport`]
//! - [`WindowedFetcher`] - sliding window over one persistent connection

mod batch;
mod connection;
mod windowed;

pub use batch::{BatchFetchConfig, BatchFetcher, HttpTransport, Transport, fetch_with_retry};
pub use connection::{Connector, MessageSink, MessageStream, WsConnector, WsSink, WsStream};
pub use windowed::{FetchState, Reply, WindowedFetchConfig, WindowedFetcher, WindowedProtocol};

use crate::{Error, Result};
use chainstat_core::files::{OutputFile, make_err_filename};
use std::io::Write;

/// A closed interval `[first, last]` of block numbers stored in one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRange {
    pub first: u64,
    pub last: u64,
}

impl BatchRange {
    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }

    /// Numbers in the batch, highest first.
    pub fn numbers(&self) -> impl Iterator<Item = u64> + use<> {
        (self.first..=self.last).rev()
    }
}

/// Split `[start, end]` into batches of at most `batch_size`, highest first.
///
/// Batches are disjoint and their union is exactly `[start, end]`. Every
/// batch but the last one (the lowest) holds exactly `batch_size` numbers.
pub fn batches(start: u64, end: u64, batch_size: u64) -> Result<Vec<BatchRange>> {
    if start > end {
        return Err(Error::InvalidRange { start, end });
    }
    if batch_size == 0 {
        return Err(chainstat_core::Error::InvalidParams {
            name: "batch_size".to_string(),
            reason: "must be greater than zero".to_string(),
        }
        .into());
    }

    let mut result = Vec::new();
    let mut last = end;
    loop {
        let first = last.saturating_sub(batch_size - 1).max(start);
        result.push(BatchRange { first, last });
        if first == start {
            break;
        }
        last = first - 1;
    }
    Ok(result)
}

/// Summary of a fetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Blocks written to batch files.
    pub fetched: u64,
    /// Blocks written to error files.
    pub failed: u64,
    /// Batch files completed.
    pub batches: u64,
    /// The run stopped early on a shutdown request.
    pub interrupted: bool,
}

/// Write `numbers`, one per line, to the errors file of `range`.
pub(crate) fn write_failed(output: &str, range: BatchRange, numbers: &[u64]) -> Result<()> {
    let path = make_err_filename(output, range.first, range.last);
    tracing::warn!(
        "{} blocks of {}..={} failed, writing {}",
        numbers.len(),
        range.first,
        range.last,
        path.display()
    );
    let mut file = OutputFile::create(&path)?;
    for number in numbers {
        writeln!(file, "{}", number)?;
    }
    file.finish()?;
    Ok(())
}

/// Completion counter logging every `interval` items.
pub(crate) struct Progress {
    pub done: u64,
    pub total: u64,
    interval: u64,
}

impl Progress {
    pub fn new(total: u64, interval: u64) -> Self {
        Self {
            done: 0,
            total,
            interval: interval.max(1),
        }
    }

    pub fn tick(&mut self) {
        self.done += 1;
        if self.done.is_multiple_of(self.interval) {
            tracing::info!("{}/{}", self.done, self.total);
        }
    }
}
