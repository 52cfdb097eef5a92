//! Error types for rfm-harvester

use thiserror::Error;

use crate::retry::IsRetryable;

/// Result type alias for rfm-harvester operations
pub type Result<T> = std::result::Result<T, Error>;

/// Run-level errors.
///
/// Only these abort a pipeline run. Per-identifier failures are reported as
/// [`crate::worker::Outcome`]s and never stop sibling work.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the problem
        message: String,
        /// The offending setting, when one can be named
        key: Option<String>,
    },

    /// The full listing of identifiers could not be obtained
    #[error("failed to list identifiers: {0}")]
    Listing(String),

    /// I/O error on one of the durable files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error on the result file
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A worker task panicked or was aborted
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Failure of a single network attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection failure, timeout, or a body that could not be read
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-OK status
    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    /// The service answered OK but the payload is not what we expect
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // A request that cannot even be built fails the same way every time
            FetchError::Transport(e) => !e.is_builder(),
            FetchError::Status(_) => false,
            FetchError::Malformed(_) => false,
        }
    }
}
