//! Prometheus metrics helpers for chainstat.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chainstat_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     if let Some(handle) = init_metrics() {
//!         start_metrics_server(9091, handle).await.unwrap();
//!     }
//!
//!     metrics::counter!(chainstat_core::metrics::FETCH_ITEMS).increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: stage (`fetch_`, `ingest_`)
//! - Suffix: `_total` for counters

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub const FETCH_ITEMS: &str = "fetch_items_total";
pub const FETCH_ITEMS_FAILED: &str = "fetch_items_failed_total";
pub const FETCH_RETRIES: &str = "fetch_retries_total";
pub const FETCH_RECONNECTS: &str = "fetch_reconnects_total";
pub const FETCH_BATCHES: &str = "fetch_batches_total";
pub const FETCH_IN_FLIGHT: &str = "fetch_in_flight";

pub const INGEST_FILES: &str = "ingest_files_total";
pub const INGEST_FILES_SKIPPED: &str = "ingest_files_skipped_total";
pub const INGEST_RECORDS: &str = "ingest_records_total";
pub const INGEST_RECORDS_DUPLICATE: &str = "ingest_records_duplicate_total";
pub const INGEST_DECODE_ERRORS: &str = "ingest_decode_errors_total";

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns `None` if a recorder is already installed.
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Serve the `/metrics` endpoint on `port` in a background task.
///
/// The listener is bound before returning, so a port conflict is reported to
/// the caller.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_common_metrics() {
    describe_counter!(FETCH_ITEMS, "Blocks fetched and written to batch files");
    describe_counter!(
        FETCH_ITEMS_FAILED,
        "Blocks written to error files after exhausting retries"
    );
    describe_counter!(FETCH_RETRIES, "Retried block requests");
    describe_counter!(FETCH_RECONNECTS, "Connection re-establishments");
    describe_counter!(FETCH_BATCHES, "Batch files completed");
    describe_gauge!(FETCH_IN_FLIGHT, "Requests currently awaiting a response");

    describe_counter!(INGEST_FILES, "Input files fully read");
    describe_counter!(INGEST_FILES_SKIPPED, "Input files that could not be opened");
    describe_counter!(INGEST_RECORDS, "Records decoded from input files");
    describe_counter!(INGEST_RECORDS_DUPLICATE, "Records dropped as duplicates");
    describe_counter!(INGEST_DECODE_ERRORS, "Records that failed to decode");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_only_once() {
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_none() || second.is_none());
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        metrics::counter!(FETCH_ITEMS).increment(1);
        metrics::gauge!(FETCH_IN_FLIGHT).set(3.0);
        register_common_metrics();
    }
}
