//! Sliding-window fetcher over a single persistent connection.
//!
//! Requests and responses share one connection and responses may arrive out
//! of order or never, so completion is tracked per identifier:
//!
//! ```text
//!          ┌──────────┐   transport error, work left   ┌──────────────┐
//!   ──────▶│ Sending  │───────────────────────────────▶│ Reconnecting │
//!          └────┬─────┘◀───────────────────────────────└──────────────┘
//!               │ nothing left to send, or shutdown
//!               ▼
//!          ┌──────────┐
//!          │ Draining │
//!          └────┬─────┘
//!               │ run finished or interrupted
//!               ▼
//!          ┌──────────┐
//!          │   Done   │
//!          └──────────┘
//! ```
//!
//! A pass sends every still-pending identifier of the batch, keeping at most
//! `window_size` requests outstanding. A pass ends when nothing is left to
//! send and nothing is in flight, when no response arrives within
//! `response_timeout`, or when the connection breaks. Confirmed identifiers
//! are never requested again. After `max_passes` the identifiers still
//! pending are written to the batch's `-errors` file.
//!
//! After shutdown no request is sent and no connection is opened. A
//! connection that breaks while draining ends the run as interrupted.

use super::connection::{Connector, MessageSink, MessageStream};
use super::{BatchRange, FetchStats, Progress, batches, write_failed};
use crate::{Error, Result};
use chainstat_core::BATCH_SIZE;
use chainstat_core::files::{OutputFile, make_filename};
use chainstat_core::metrics::{
    FETCH_BATCHES, FETCH_IN_FLIGHT, FETCH_ITEMS, FETCH_ITEMS_FAILED, FETCH_RECONNECTS,
};
use metrics::{counter, gauge};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for the windowed fetcher.
#[derive(Debug, Clone)]
pub struct WindowedFetchConfig {
    /// Blocks per output file.
    pub batch_size: u64,

    /// Maximum requests awaiting a response.
    pub window_size: usize,

    /// Passes over a batch before giving up on what is left.
    pub max_passes: u32,

    /// A pass ends when no response arrives for this long.
    pub response_timeout: Duration,

    /// Grace period for in-flight responses after shutdown.
    pub drain_timeout: Duration,

    /// How long to wait for the peer to acknowledge a close.
    pub close_timeout: Duration,

    /// Log progress every N confirmed blocks.
    pub progress_interval: u64,
}

impl Default for WindowedFetchConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            window_size: 20,
            max_passes: 5,
            response_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
            progress_interval: 100,
        }
    }
}

/// Observable state of a [`WindowedFetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Sending,
    Draining,
    Reconnecting,
    Done,
}

/// How an inbound message relates to the outstanding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The record for this identifier.
    Record(u64),
    /// The peer answered this identifier with an error.
    Failed(u64),
    /// Anything else (subscriptions, malformed data).
    Unknown,
}

/// Request encoding and response correlation for one protocol.
pub trait WindowedProtocol: Send + Sync {
    fn request(&self, number: u64) -> String;

    fn classify(&self, message: &[u8]) -> Reply;
}

enum PassOutcome {
    /// Nothing left to send and nothing in flight.
    Finished,
    /// No response within `response_timeout`.
    TimedOut,
    /// Shutdown requested and in-flight responses drained.
    Interrupted,
    /// The connection failed.
    Broken(Error),
}

type Connection<C> = (<C as Connector>::Sink, <C as Connector>::Stream);

pub struct WindowedFetcher<C: Connector, P> {
    connector: C,
    protocol: P,
    config: WindowedFetchConfig,
    state: watch::Sender<FetchState>,
}

impl<C: Connector, P: WindowedProtocol> WindowedFetcher<C, P> {
    pub fn new(connector: C, protocol: P, config: WindowedFetchConfig) -> Self {
        Self {
            connector,
            protocol,
            config,
            state: watch::Sender::new(FetchState::Sending),
        }
    }

    pub fn state(&self) -> FetchState {
        *self.state.borrow()
    }

    /// Follow state changes while a fetch is running.
    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: FetchState) {
        self.state.send_replace(state);
    }

    /// Fetch `[start, end]` into batch files prefixed with `output`.
    ///
    /// The initial connection and every reconnect must succeed, otherwise the
    /// run is aborted. The connection is closed cleanly before returning.
    pub async fn fetch(
        &mut self,
        output: &str,
        start: u64,
        end: u64,
        shutdown: &CancellationToken,
    ) -> Result<FetchStats> {
        let ranges = batches(start, end, self.config.batch_size)?;
        let total = (end - start).saturating_add(1);
        let mut progress = Progress::new(total, self.config.progress_interval);
        tracing::info!("Fetching {} blocks in {} batches", progress.total, ranges.len());

        let mut connection = Some(self.connector.connect().await?);
        let mut stats = FetchStats::default();
        let result = self
            .fetch_ranges(output, ranges, &mut connection, shutdown, &mut stats, &mut progress)
            .await;

        if let Some((sink, stream)) = connection.take() {
            self.close(sink, stream).await;
        }
        self.set_state(FetchState::Done);
        gauge!(FETCH_IN_FLIGHT).set(0.0);

        if stats.interrupted {
            tracing::info!("Fetch interrupted after {} blocks", progress.done);
        }
        result.map(|()| stats)
    }

    async fn fetch_ranges(
        &mut self,
        output: &str,
        ranges: Vec<BatchRange>,
        connection: &mut Option<Connection<C>>,
        shutdown: &CancellationToken,
        stats: &mut FetchStats,
        progress: &mut Progress,
    ) -> Result<()> {
        for range in ranges {
            if shutdown.is_cancelled() {
                stats.interrupted = true;
                break;
            }
            let complete = self
                .fetch_batch(output, range, connection, shutdown, stats, progress)
                .await?;
            if !complete {
                stats.interrupted = true;
                break;
            }
            stats.batches += 1;
            counter!(FETCH_BATCHES).increment(1);
        }
        Ok(())
    }

    /// Fetch one batch over as many passes as needed. Returns `false` if
    /// shutdown cut it short.
    async fn fetch_batch(
        &mut self,
        output: &str,
        range: BatchRange,
        connection: &mut Option<Connection<C>>,
        shutdown: &CancellationToken,
        stats: &mut FetchStats,
        progress: &mut Progress,
    ) -> Result<bool> {
        let path = make_filename(output, range.first, range.last);
        tracing::debug!(
            "Fetching batch {}..={} into {}",
            range.first,
            range.last,
            path.display()
        );
        let mut file = OutputFile::create(&path)?;
        let mut pending: BTreeSet<u64> = range.numbers().collect();
        let mut interrupted = false;

        for pass in 1..=self.config.max_passes {
            if pending.is_empty() {
                break;
            }
            if shutdown.is_cancelled() {
                interrupted = true;
                break;
            }
            if pass > 1 {
                tracing::info!(
                    "{} blocks left in batch, pass {}/{}",
                    pending.len(),
                    pass,
                    self.config.max_passes
                );
            }

            let (mut sink, mut stream) = match connection.take() {
                Some(conn) => conn,
                None => self.reconnect().await?,
            };
            let outcome = self
                .run_pass(
                    &mut sink,
                    &mut stream,
                    &mut pending,
                    &mut file,
                    shutdown,
                    stats,
                    progress,
                )
                .await?;

            match outcome {
                PassOutcome::Finished | PassOutcome::TimedOut => {
                    *connection = Some((sink, stream));
                }
                PassOutcome::Interrupted => {
                    *connection = Some((sink, stream));
                    interrupted = true;
                    break;
                }
                PassOutcome::Broken(e) if shutdown.is_cancelled() => {
                    tracing::info!("Connection failed while draining: {}", e);
                    interrupted = true;
                    break;
                }
                PassOutcome::Broken(e) => {
                    tracing::warn!("Connection failed: {}", e);
                }
            }
        }
        file.finish()?;

        if !pending.is_empty() && !interrupted {
            let failed: Vec<u64> = pending.iter().rev().copied().collect();
            stats.failed += failed.len() as u64;
            counter!(FETCH_ITEMS_FAILED).increment(failed.len() as u64);
            write_failed(output, range, &failed)?;
        }
        Ok(!interrupted)
    }

    async fn reconnect(&mut self) -> Result<Connection<C>> {
        self.set_state(FetchState::Reconnecting);
        counter!(FETCH_RECONNECTS).increment(1);
        tracing::info!("Reconnecting");
        self.connector
            .connect()
            .await
            .map_err(|e| Error::Connection(format!("reconnect failed: {}", e)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_pass(
        &mut self,
        sink: &mut C::Sink,
        stream: &mut C::Stream,
        pending: &mut BTreeSet<u64>,
        file: &mut OutputFile,
        shutdown: &CancellationToken,
        stats: &mut FetchStats,
        progress: &mut Progress,
    ) -> Result<PassOutcome> {
        let window = self.config.window_size.max(1);
        let mut queue = pending.iter().rev().copied().collect::<Vec<_>>().into_iter();
        let mut in_flight: HashSet<u64> = HashSet::with_capacity(window);
        // Shutdown may have fired while reconnecting.
        let mut drain_deadline = shutdown
            .is_cancelled()
            .then(|| Instant::now() + self.config.drain_timeout);
        let mut queue_done = false;
        self.set_state(if drain_deadline.is_some() {
            FetchState::Draining
        } else {
            FetchState::Sending
        });

        loop {
            if drain_deadline.is_none() && !queue_done {
                while in_flight.len() < window {
                    // Late responses from an earlier pass may already have
                    // confirmed some queued identifiers.
                    let Some(number) = queue.find(|number| pending.contains(number)) else {
                        queue_done = true;
                        self.set_state(FetchState::Draining);
                        break;
                    };
                    if let Err(e) = sink.send(self.protocol.request(number)).await {
                        return Ok(PassOutcome::Broken(e));
                    }
                    in_flight.insert(number);
                }
            }
            gauge!(FETCH_IN_FLIGHT).set(in_flight.len() as f64);

            if in_flight.is_empty() {
                return Ok(if drain_deadline.is_some() {
                    PassOutcome::Interrupted
                } else {
                    PassOutcome::Finished
                });
            }

            let wait = match drain_deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.config.response_timeout,
            };

            tokio::select! {
                _ = shutdown.cancelled(), if drain_deadline.is_none() => {
                    tracing::info!(
                        "Shutdown requested, draining {} in-flight requests",
                        in_flight.len()
                    );
                    drain_deadline = Some(Instant::now() + self.config.drain_timeout);
                    self.set_state(FetchState::Draining);
                }
                message = tokio::time::timeout(wait, stream.next_message()) => match message {
                    Err(_) if drain_deadline.is_some() => return Ok(PassOutcome::Interrupted),
                    Err(_) => {
                        tracing::warn!(
                            "No response within {:?}, {} requests outstanding",
                            self.config.response_timeout,
                            in_flight.len()
                        );
                        return Ok(PassOutcome::TimedOut);
                    }
                    Ok(None) => {
                        return Ok(PassOutcome::Broken(Error::Connection(
                            "connection closed by peer".to_string(),
                        )));
                    }
                    Ok(Some(Err(e))) => return Ok(PassOutcome::Broken(e)),
                    Ok(Some(Ok(message))) => {
                        self.handle_reply(
                            &message,
                            pending,
                            &mut in_flight,
                            file,
                            stats,
                            progress,
                        )?;
                    }
                },
            }
        }
    }

    fn handle_reply(
        &self,
        message: &[u8],
        pending: &mut BTreeSet<u64>,
        in_flight: &mut HashSet<u64>,
        file: &mut OutputFile,
        stats: &mut FetchStats,
        progress: &mut Progress,
    ) -> Result<()> {
        match self.protocol.classify(message) {
            Reply::Record(number) if pending.remove(&number) => {
                in_flight.remove(&number);
                file.write_all(message.trim_ascii())?;
                file.write_all(b"\n")?;
                stats.fetched += 1;
                counter!(FETCH_ITEMS).increment(1);
                progress.tick();
            }
            Reply::Record(number) => {
                tracing::debug!("Ignoring unsolicited response for {}", number);
            }
            Reply::Failed(number) => {
                if in_flight.remove(&number) {
                    tracing::debug!("Request for {} failed, will retry", number);
                }
            }
            Reply::Unknown => {
                tracing::debug!("Ignoring unrecognized message ({} bytes)", message.len());
            }
        }
        Ok(())
    }

    async fn close(&self, mut sink: C::Sink, mut stream: C::Stream) {
        if let Err(e) = sink.close().await {
            tracing::debug!("Could not send close: {}", e);
            return;
        }
        let acknowledged = tokio::time::timeout(self.config.close_timeout, async {
            while let Some(Ok(_)) = stream.next_message().await {}
        })
        .await;
        if acknowledged.is_err() {
            tracing::debug!(
                "Peer did not acknowledge close within {:?}",
                self.config.close_timeout
            );
        }
    }
}
