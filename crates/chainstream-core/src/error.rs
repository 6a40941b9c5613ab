//! Error types for the streaming pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`BatchFetcher`](crate::fetcher::BatchFetcher).
///
/// The controller never looks inside these; it only forwards them to the
/// consumer. `is_retryable` is consulted by [`RetryingFetcher`](crate::fetcher::RetryingFetcher).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Connection refused, reset, timed out, etc.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status code.
    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The backend refused the query (malformed selection, unsupported range, ...).
    #[error("query rejected: {0}")]
    Rejected(String),

    /// The response decoded fine but breaks the batch contract.
    #[error("invalid batch response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Returns `true` if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

/// Errors surfaced by the stream controller and the consumer loop.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid block range: start {start} > end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("invalid stream options: {0}")]
    InvalidOptions(String),

    /// The fetcher refused the selections before the stream started.
    #[error("selection rejected by backend: {0}")]
    InvalidSelection(#[source] BackendError),

    /// The backend failed while the stream was running.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The caller cancelled the stream before it reached the end of the range.
    #[error("stream cancelled")]
    Cancelled,

    /// No message arrived within the consumer's inactivity deadline.
    #[error("no stream activity for {}s", .idle.as_secs())]
    Inactive { idle: Duration },

    #[error("batch handler failed: {0}")]
    Handler(String),
}

impl StreamError {
    /// Returns `true` if the stream was rejected before any work started.
    pub fn is_rejected_at_start(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. } | Self::InvalidOptions(_) | Self::InvalidSelection(_)
        )
    }

    /// Returns `true` if the stream ended because of the caller, not the backend.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Inactive { .. })
    }
}
