//! Error types for fetching and ingestion.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching or ingesting chain data.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the core crate (configuration, aggregators, files).
    #[error(transparent)]
    Core(#[from] chainstat_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("MessagePack encode error: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),

    /// CSV writing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid glob pattern.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP status {status} for block {number}")]
    Status { number: u64, status: u16 },

    /// Connection-level failure of a persistent connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Start of a range lies after its end.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: u64, end: u64 },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker thread panicked.
    #[error("Worker thread panicked: {0}")]
    WorkerPanic(&'static str),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Connection(e.to_string())
    }
}
