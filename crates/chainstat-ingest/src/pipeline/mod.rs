//! Multi-file streaming ingestion of stored blocks.
//!
//! # Architecture
//!
//! ```text
//! glob → [feeder] ─files─▶ [worker × N] ─blocks─▶ [dedupe] ─blocks─▶ BlockStream
//!                           decode files           seen-set +
//!                           in parallel            range filter
//! ```
//!
//! Every arrow is a bounded `crossbeam` channel. The dedup set lives on its
//! own thread and is never shared. The output channel closes once every
//! worker has finished and the dedup thread has drained its input.
//!
//! Dropping the [`BlockStream`] (or calling [`BlockStream::finish`] early)
//! closes the output channel; each stage notices the failed send and winds
//! down.

mod dedupe;
mod format;

pub use dedupe::{Admission, DedupeFilter, DedupeStats};
pub use format::{FileFormat, FileReport, read_json_lines, read_msgpack, sanitize_utf8};

use crate::chains::Blockchain;
use crate::{Error, Result};
use chainstat_core::Block;
use chainstat_core::files::open_file;
use chainstat_core::metrics as m;
use crossbeam_channel::{Receiver, Sender, bounded};
use metrics::counter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Configuration for one ingestion run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Glob pattern of the input files.
    pub pattern: String,

    /// Lowest block number to deliver (0 = unbounded).
    pub start: u64,

    /// Highest block number to deliver (0 = unbounded).
    pub end: u64,

    /// Number of file-decoding threads.
    pub workers: usize,

    /// Capacity of the block channels.
    pub channel_capacity: usize,

    /// Progress reporting interval (records received by the dedup stage).
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            start: 0,
            end: 0,
            workers: num_cpus::get(),
            channel_capacity: 1024,
            progress_interval: 100_000,
        }
    }
}

impl PipelineConfig {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngestStats {
    /// Files read (fully or until the first undecodable record).
    pub files: u64,
    /// Files skipped for an unknown format or an open failure.
    pub files_skipped: u64,
    /// Records decoded by the workers.
    pub records: u64,
    /// Records dropped as duplicates.
    pub duplicates: u64,
    /// Records dropped by the range filter.
    pub filtered: u64,
    /// Records that could not be decoded.
    pub decode_errors: u64,
    /// Records delivered to the caller.
    pub delivered: u64,
}

#[derive(Debug, Default)]
struct WorkerStats {
    files: u64,
    files_skipped: u64,
    records: u64,
    decode_errors: u64,
}

/// Expand `pattern` into a sorted list of files.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Cannot read {}: {}", e.path().display(), e.error()),
        }
    }
    files.sort();
    Ok(files)
}

/// Decoded, deduplicated blocks of one ingestion run.
///
/// Iterate to receive blocks, then call [`BlockStream::finish`] to join the
/// pipeline threads and collect the run's statistics.
pub struct BlockStream<B> {
    blocks: Receiver<B>,
    feeder: JoinHandle<()>,
    workers: Vec<JoinHandle<WorkerStats>>,
    dedupe: JoinHandle<DedupeStats>,
}

impl<B> Iterator for BlockStream<B> {
    type Item = B;

    fn next(&mut self) -> Option<B> {
        self.blocks.recv().ok()
    }
}

impl<B> BlockStream<B> {
    /// Stop consuming, wait for every pipeline thread and return the totals.
    pub fn finish(self) -> Result<IngestStats> {
        let Self {
            blocks,
            feeder,
            workers,
            dedupe,
        } = self;
        drop(blocks);

        let dedupe = dedupe
            .join()
            .map_err(|_| Error::WorkerPanic("ingest dedupe"))?;

        let mut stats = IngestStats {
            duplicates: dedupe.duplicates,
            filtered: dedupe.filtered,
            delivered: dedupe.accepted,
            ..Default::default()
        };
        for worker in workers {
            let worker = worker
                .join()
                .map_err(|_| Error::WorkerPanic("ingest worker"))?;
            stats.files += worker.files;
            stats.files_skipped += worker.files_skipped;
            stats.records += worker.records;
            stats.decode_errors += worker.decode_errors;
        }
        feeder
            .join()
            .map_err(|_| Error::WorkerPanic("ingest feeder"))?;

        info!(
            "Ingested {} files ({} skipped): {} records, {} delivered, {} duplicates, \
             {} filtered, {} decode errors",
            stats.files,
            stats.files_skipped,
            stats.records,
            stats.delivered,
            stats.duplicates,
            stats.filtered,
            stats.decode_errors
        );
        Ok(stats)
    }
}

/// Start an ingestion run over the files matching `config.pattern`.
///
/// Only an invalid pattern or a failure to spawn threads is an error;
/// unreadable files and undecodable records are logged, counted and skipped.
pub fn stream_blocks<C: Blockchain>(
    chain: Arc<C>,
    config: &PipelineConfig,
) -> Result<BlockStream<C::Block>> {
    let files = expand_pattern(&config.pattern)?;
    info!("Found {} files matching {}", files.len(), config.pattern);

    let workers = config.workers.clamp(1, files.len().max(1));
    let capacity = config.channel_capacity.max(1);

    let (file_tx, file_rx) = bounded::<PathBuf>(workers);
    let (record_tx, record_rx) = bounded::<C::Block>(capacity);
    let (out_tx, out_rx) = bounded::<C::Block>(capacity);

    let feeder = thread::Builder::new()
        .name("ingest-feeder".to_string())
        .spawn(move || {
            for file in files {
                if file_tx.send(file).is_err() {
                    break;
                }
            }
        })?;

    let mut handles = Vec::with_capacity(workers);
    for index in 0..workers {
        let chain = Arc::clone(&chain);
        let file_rx = file_rx.clone();
        let record_tx = record_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("ingest-worker-{}", index))
            .spawn(move || {
                let mut stats = WorkerStats::default();
                for path in file_rx {
                    if !read_file(chain.as_ref(), &path, &record_tx, &mut stats) {
                        break;
                    }
                }
                stats
            })?;
        handles.push(handle);
    }
    // Workers hold the only remaining senders.
    drop(record_tx);
    drop(file_rx);

    let (start, end) = (config.start, config.end);
    let interval = config.progress_interval.max(1);
    let dedupe = thread::Builder::new()
        .name("ingest-dedupe".to_string())
        .spawn(move || run_dedupe(record_rx, out_tx, start, end, interval))?;

    Ok(BlockStream {
        blocks: out_rx,
        feeder,
        workers: handles,
        dedupe,
    })
}

fn run_dedupe<B: Block>(
    input: Receiver<B>,
    output: Sender<B>,
    start: u64,
    end: u64,
    interval: u64,
) -> DedupeStats {
    let mut filter = DedupeFilter::new(start, end);
    for block in input {
        match filter.check(block.number()) {
            Admission::Accepted => {
                if output.send(block).is_err() {
                    debug!("Block stream dropped, stopping dedupe");
                    break;
                }
            }
            Admission::Duplicate => counter!(m::INGEST_RECORDS_DUPLICATE).increment(1),
            Admission::OutOfRange => {}
        }

        let stats = filter.stats();
        if stats.received.is_multiple_of(interval) {
            info!(
                "{} records received, {} delivered, {} duplicates",
                stats.received, stats.accepted, stats.duplicates
            );
        }
    }
    filter.into_stats()
}

/// Decode one file into `output`. Returns `false` once the consumer is gone.
fn read_file<C: Blockchain>(
    chain: &C,
    path: &Path,
    output: &Sender<C::Block>,
    stats: &mut WorkerStats,
) -> bool {
    let Some(format) = FileFormat::from_path(path) else {
        warn!("Skipping {}: unknown file format", path.display());
        stats.files_skipped += 1;
        counter!(m::INGEST_FILES_SKIPPED).increment(1);
        return true;
    };

    let reader = match open_file(path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            stats.files_skipped += 1;
            counter!(m::INGEST_FILES_SKIPPED).increment(1);
            return true;
        }
    };

    let mut report = FileReport::default();
    let mut consumer_gone = false;
    let emit = |block: C::Block| {
        let sent = output.send(block).is_ok();
        consumer_gone = !sent;
        sent
    };

    let result = match format {
        FileFormat::JsonLines => {
            read_json_lines(reader, path, |raw| chain.parse_block(raw), &mut report, emit)
        }
        FileFormat::MsgPack => read_msgpack(reader, path, &mut report, emit),
    };
    if let Err(e) = result {
        // Typically a truncated gzip stream; keep what was decoded.
        warn!("Error reading {}: {}", path.display(), e);
        report.decode_errors += 1;
    }

    stats.files += 1;
    stats.records += report.records;
    stats.decode_errors += report.decode_errors;
    counter!(m::INGEST_FILES).increment(1);
    counter!(m::INGEST_RECORDS).increment(report.records);
    counter!(m::INGEST_DECODE_ERRORS).increment(report.decode_errors);
    debug!(
        "Read {} records from {} ({} decode errors)",
        report.records,
        path.display(),
        report.decode_errors
    );

    !consumer_gone
}
