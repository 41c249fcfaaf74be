//! Worker-pool fetcher for request/response sources.
//!
//! Batches are fetched one after another, highest first. Within a batch up to
//! `workers` requests run concurrently and complete in any order; the driving
//! task is the only writer of the batch file.

use super::{BatchRange, FetchStats, Progress, batches, write_failed};
use crate::{Error, Result};
use chainstat_core::BATCH_SIZE;
use chainstat_core::files::{OutputFile, make_filename};
use chainstat_core::metrics::{
    FETCH_BATCHES, FETCH_IN_FLIGHT, FETCH_ITEMS, FETCH_ITEMS_FAILED, FETCH_RETRIES,
};
use futures_util::{StreamExt, future, stream};
use metrics::{counter, gauge};
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for the batch fetcher.
#[derive(Debug, Clone)]
pub struct BatchFetchConfig {
    /// Blocks per output file.
    pub batch_size: u64,

    /// Concurrent requests within a batch.
    pub workers: usize,

    /// Retries after the first failed attempt.
    pub retries: u32,

    /// Pause between attempts.
    pub retry_backoff: Duration,

    /// Log progress every N completed blocks.
    pub progress_interval: u64,
}

impl Default for BatchFetchConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            workers: 10,
            retries: 3,
            retry_backoff: Duration::from_secs(1),
            progress_interval: 100,
        }
    }
}

/// Fetches the raw bytes of a single block.
pub trait Transport: Send + Sync {
    fn fetch(&self, number: u64) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

type RequestBuilderFn = dyn Fn(&reqwest::Client, u64) -> reqwest::RequestBuilder + Send + Sync;

/// [`Transport`] over HTTP; the chain supplies the request for a block.
///
/// Any non-2xx status counts as a failed attempt.
pub struct HttpTransport {
    client: reqwest::Client,
    request: Box<RequestBuilderFn>,
}

impl HttpTransport {
    pub fn new<F>(request: F) -> Result<Self>
    where
        F: Fn(&reqwest::Client, u64) -> reqwest::RequestBuilder + Send + Sync + 'static,
    {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            client,
            request: Box::new(request),
        })
    }
}

impl Transport for HttpTransport {
    async fn fetch(&self, number: u64) -> Result<Vec<u8>> {
        let response = (self.request)(&self.client, number).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                number,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Fetch `number`, retrying up to `retries` times with a fixed pause.
///
/// Returns the last error once the budget is exhausted, and `None` when
/// `shutdown` fires before a retry is issued. An attempt already running is
/// always awaited.
pub async fn fetch_with_retry<T: Transport>(
    transport: &T,
    number: u64,
    retries: u32,
    backoff: Duration,
    shutdown: &CancellationToken,
) -> Result<Option<Vec<u8>>> {
    let mut attempt = 0;
    loop {
        match transport.fetch(number).await {
            Ok(body) => return Ok(Some(body)),
            Err(e) if attempt >= retries => return Err(e),
            Err(e) if shutdown.is_cancelled() => {
                tracing::debug!("Block {}: {}, not retried after shutdown", number, e);
                return Ok(None);
            }
            Err(e) => {
                attempt += 1;
                counter!(FETCH_RETRIES).increment(1);
                tracing::debug!("Block {}: {}, retry {}/{}", number, e, attempt, retries);
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// Range fetcher over a [`Transport`].
pub struct BatchFetcher<T> {
    transport: T,
    config: BatchFetchConfig,
}

impl<T: Transport> BatchFetcher<T> {
    pub fn new(transport: T, config: BatchFetchConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &BatchFetchConfig {
        &self.config
    }

    /// Fetch `[start, end]` into batch files prefixed with `output`.
    ///
    /// Failing to create an output file aborts the run. Once `shutdown` fires
    /// no new request or retry is started; attempts already running complete
    /// and are written before returning.
    pub async fn fetch(
        &self,
        output: &str,
        start: u64,
        end: u64,
        shutdown: &CancellationToken,
    ) -> Result<FetchStats> {
        let ranges = batches(start, end, self.config.batch_size)?;
        let total = (end - start).saturating_add(1);
        let mut progress = Progress::new(total, self.config.progress_interval);
        let mut stats = FetchStats::default();

        tracing::info!("Fetching {} blocks in {} batches", progress.total, ranges.len());

        for range in ranges {
            if shutdown.is_cancelled() {
                stats.interrupted = true;
                break;
            }
            let complete = self
                .fetch_batch(output, range, shutdown, &mut stats, &mut progress)
                .await?;
            if !complete {
                stats.interrupted = true;
                break;
            }
            stats.batches += 1;
            counter!(FETCH_BATCHES).increment(1);
        }

        if stats.interrupted {
            tracing::info!("Fetch interrupted after {} blocks", progress.done);
        }
        Ok(stats)
    }

    /// Fetch one batch. Returns `false` if shutdown cut it short.
    async fn fetch_batch(
        &self,
        output: &str,
        range: BatchRange,
        shutdown: &CancellationToken,
        stats: &mut FetchStats,
        progress: &mut Progress,
    ) -> Result<bool> {
        let path = make_filename(output, range.first, range.last);
        tracing::debug!("Fetching batch {}..={} into {}", range.first, range.last, path.display());
        let mut file = OutputFile::create(&path)?;

        let retries = self.config.retries;
        let backoff = self.config.retry_backoff;
        let transport = &self.transport;

        let mut results = stream::iter(range.numbers())
            .take_while(|_| future::ready(!shutdown.is_cancelled()))
            .map(|number| async move {
                gauge!(FETCH_IN_FLIGHT).increment(1.0);
                let result = fetch_with_retry(transport, number, retries, backoff, shutdown).await;
                gauge!(FETCH_IN_FLIGHT).decrement(1.0);
                (number, result)
            })
            .buffer_unordered(self.config.workers.max(1));

        let mut failed = Vec::new();
        let mut written = 0u64;
        while let Some((number, result)) = results.next().await {
            match result {
                Ok(Some(body)) => {
                    file.write_all(body.trim_ascii())?;
                    file.write_all(b"\n")?;
                    stats.fetched += 1;
                    counter!(FETCH_ITEMS).increment(1);
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Could not fetch block {}: {}", number, e);
                    failed.push(number);
                    stats.failed += 1;
                    counter!(FETCH_ITEMS_FAILED).increment(1);
                }
            }
            written += 1;
            progress.tick();
        }
        file.finish()?;

        if !failed.is_empty() {
            failed.sort_unstable_by(|a, b| b.cmp(a));
            write_failed(output, range, &failed)?;
        }
        Ok(written == range.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainstat_core::files::{make_err_filename, open_file};
    use std::collections::HashMap;
    use std::io::BufRead;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MockTransport {
        /// Remaining failures per block before it succeeds; `u32::MAX` never succeeds.
        failures: Mutex<HashMap<u64, u32>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockTransport {
        fn failing(failures: &[(u64, u32)]) -> Self {
            Self {
                failures: Mutex::new(failures.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    impl Transport for MockTransport {
        async fn fetch(&self, number: u64) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let fail = {
                let mut failures = self.failures.lock().unwrap();
                match failures.get_mut(&number) {
                    Some(remaining) if *remaining > 0 => {
                        if *remaining != u32::MAX {
                            *remaining -= 1;
                        }
                        true
                    }
                    _ => false,
                }
            };
            if fail {
                return Err(Error::Status { number, status: 503 });
            }
            Ok(format!("  {{\"number\":{}}}\n", number).into_bytes())
        }
    }

    fn config(batch_size: u64) -> BatchFetchConfig {
        BatchFetchConfig {
            batch_size,
            workers: 4,
            retries: 3,
            retry_backoff: Duration::from_millis(1),
            progress_interval: 10,
        }
    }

    fn read_lines(path: &std::path::Path) -> Vec<String> {
        open_file(path).unwrap().lines().map(|l| l.unwrap()).collect()
    }

    #[tokio::test]
    async fn test_fetch_writes_one_file_per_batch() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("blocks.jsonl.gz");
        let output = output.to_str().unwrap();

        let fetcher = BatchFetcher::new(MockTransport::default(), config(10));
        let stats = fetcher
            .fetch(output, 1, 25, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.fetched, 25);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.batches, 3);
        assert!(!stats.interrupted);

        let mut seen = Vec::new();
        for (first, last) in [(16, 25), (6, 15), (1, 5)] {
            let lines = read_lines(&make_filename(output, first, last));
            assert_eq!(lines.len() as u64, last - first + 1);
            for line in lines {
                assert!(line.starts_with('{'), "line not trimmed: {:?}", line);
                let value: serde_json::Value = serde_json::from_str(&line).unwrap();
                seen.push(value["number"].as_u64().unwrap());
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("blocks.jsonl");
        let output = output.to_str().unwrap();

        let fetcher = BatchFetcher::new(MockTransport::failing(&[(7, 2)]), config(100));
        let stats = fetcher
            .fetch(output, 1, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.fetched, 10);
        assert_eq!(fetcher.transport.calls.load(Ordering::SeqCst), 12);
        assert!(!make_err_filename(output, 1, 10).exists());
    }

    #[tokio::test]
    async fn test_exhausted_retries_go_to_errors_file() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("blocks.jsonl");
        let output = output.to_str().unwrap();

        let fetcher = BatchFetcher::new(
            MockTransport::failing(&[(7, u32::MAX), (3, u32::MAX)]),
            config(100),
        );
        let stats = fetcher
            .fetch(output, 1, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.fetched, 8);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.batches, 1);
        // 1 attempt + 3 retries for each failing block
        assert_eq!(fetcher.transport.calls.load(Ordering::SeqCst), 8 + 2 * 4);

        let errors = read_lines(&make_err_filename(output, 1, 10));
        assert_eq!(errors, vec!["7".to_string(), "3".to_string()]);
        assert_eq!(read_lines(&make_filename(output, 1, 10)).len(), 8);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_workers() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("blocks.jsonl");
        let output = output.to_str().unwrap();

        let fetcher = BatchFetcher::new(MockTransport::default(), config(50));
        fetcher
            .fetch(output, 1, 50, &CancellationToken::new())
            .await
            .unwrap();

        let max = fetcher.transport.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 4, "max in flight {}", max);
        assert!(max >= 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("blocks.jsonl");
        let output = output.to_str().unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let fetcher = BatchFetcher::new(MockTransport::default(), config(10));
        let stats = fetcher.fetch(output, 1, 25, &shutdown).await.unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.fetched, 0);
        assert_eq!(fetcher.transport.calls.load(Ordering::SeqCst), 0);
        assert!(!make_filename(output, 16, 25).exists());
    }

    #[tokio::test]
    async fn test_shutdown_stops_retries_mid_batch() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("blocks.jsonl");
        let output = output.to_str().unwrap();

        let fetcher = BatchFetcher::new(
            MockTransport::failing(&[(10, u32::MAX)]),
            BatchFetchConfig {
                workers: 1,
                retry_backoff: Duration::from_secs(10),
                ..config(10)
            },
        );

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let stats = fetcher.fetch(output, 1, 10, &shutdown).await.unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.fetched, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.batches, 0);
        // Only the attempt issued before shutdown; no retry and no new block.
        assert_eq!(fetcher.transport.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!make_err_filename(output, 1, 10).exists());
        assert!(read_lines(&make_filename(output, 1, 10)).is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_shutdown() {
        let transport = MockTransport::failing(&[(4, u32::MAX)]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = fetch_with_retry(&transport, 4, 3, Duration::from_secs(10), &shutdown).await;

        assert!(matches!(result, Ok(None)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_range_is_rejected() {
        let fetcher = BatchFetcher::new(MockTransport::default(), config(10));
        let result = fetcher
            .fetch("blocks.jsonl", 10, 1, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_unwritable_output_is_fatal() {
        let fetcher = BatchFetcher::new(MockTransport::default(), config(10));
        let result = fetcher
            .fetch("/nonexistent-dir/blocks.jsonl", 1, 5, &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
