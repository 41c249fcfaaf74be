//! Error types for the chainstat block model and aggregators.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding blocks or configuring aggregators.
#[derive(Error, Debug)]
pub enum Error {
    /// An action property name other than `name`, `sender` or `receiver`.
    #[error("unknown action property '{0}' (expected name, sender or receiver)")]
    UnknownActionProperty(String),

    /// A duration string that could not be parsed, or a zero duration.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration {
        /// The duration string as written in the configuration.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A processor type with no registered factory.
    #[error("unknown processor type '{kind}' for processor '{name}'")]
    UnknownProcessor {
        /// The declared processor name.
        name: String,
        /// The requested processor type.
        kind: String,
    },

    /// Two processors declared with the same name.
    #[error("duplicate processor name '{0}'")]
    DuplicateProcessor(String),

    /// Processor parameters that do not match the processor type.
    #[error("invalid parameters for processor '{name}': {reason}")]
    InvalidParams {
        /// The declared processor name.
        name: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
