//! Error types for chatload

use std::time::Duration;

use thiserror::Error;

/// Library error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, surfaced before a run starts
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP transport error
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Terminal non-success HTTP status
    #[error("call failed: apim-request-id={request_id:?} status={status}")]
    Status {
        /// HTTP status code of the failed attempt
        status: u16,
        /// Server-assigned request id header, when present
        request_id: Option<String>,
    },

    /// Retry budget exhausted while the server kept throttling
    #[error("retry budget of {budget:?} exhausted after {calls} attempts (last status {status})")]
    RetriesExhausted {
        /// Total retry budget that was exceeded
        budget: Duration,
        /// HTTP attempts made for the logical request
        calls: u32,
        /// Status of the final attempt
        status: u16,
    },

    /// A run is already active on this manager
    #[error("a run labeled {0:?} is already active")]
    RunActive(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
