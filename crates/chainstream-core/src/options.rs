//! Stream tuning knobs and lifecycle state.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Default number of blocks per backend request.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Upper bound on the ack window.
pub const MAX_WINDOW: usize = 1024;

/// Configuration for one range stream.
///
/// At most `window` delivered-but-unacknowledged batches exist at any time,
/// plus a single terminal message, so the memory held by a stream is bounded
/// by `window` batch responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// How many blocks to request per batch fetch.
    pub batch_size: u64,
    /// How many batches may be delivered before the consumer acknowledges.
    /// `1` means strict lock-step: fetch, deliver, wait for ack.
    pub window: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            window: 1,
        }
    }
}

impl StreamOptions {
    /// Default options with the given batch size.
    pub fn with_batch_size(batch_size: u64) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    /// Set the ack window.
    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reject options the controller cannot run with.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.batch_size == 0 {
            return Err(StreamError::InvalidOptions(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.window == 0 || self.window > MAX_WINDOW {
            return Err(StreamError::InvalidOptions(format!(
                "window must be between 1 and {MAX_WINDOW}, got {}",
                self.window
            )));
        }
        Ok(())
    }
}

/// Termination state of a stream, as last written by its producer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// Still fetching or waiting for acknowledgments.
    Running,
    /// Reached the end of the range; completion was published.
    Completed,
    /// A fetch failed; the error was published.
    Failed,
    /// Stopped by the caller without a terminal message.
    Cancelled,
}

impl StreamState {
    /// Returns `true` once the producer has stopped.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
