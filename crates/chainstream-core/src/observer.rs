//! Lifecycle callbacks for streams and consumers.
//!
//! The controller and the consumer never log through a global; they report
//! to the `StreamObserver` they were given. [`TracingObserver`] forwards to
//! `tracing`, [`NoopObserver`] discards everything.

use std::time::Duration;

use crate::error::BackendError;
use crate::options::StreamOptions;
use crate::types::{BatchResponse, BlockRange};

/// Receives stream lifecycle events. All methods default to no-ops.
pub trait StreamObserver: Send + Sync + 'static {
    fn stream_started(&self, _range: BlockRange, _options: &StreamOptions) {}

    fn batch_fetched(&self, _batch: &BatchResponse) {}

    fn stream_completed(&self, _range: BlockRange, _batches: u64) {}

    fn stream_failed(&self, _cursor: u64, _error: &BackendError) {}

    fn stream_cancelled(&self, _cursor: u64) {}

    /// Consumer side: no message arrived within the inactivity deadline.
    fn stream_inactive(&self, _idle: Duration, _last_block: Option<u64>) {}
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    /// `label` is attached to every record (e.g. the network name).
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl StreamObserver for TracingObserver {
    fn stream_started(&self, range: BlockRange, options: &StreamOptions) {
        tracing::info!(
            stream = %self.label,
            start_block = range.start,
            end_block = range.end,
            batch_size = options.batch_size,
            window = options.window,
            "log range stream started"
        );
    }

    fn batch_fetched(&self, batch: &BatchResponse) {
        tracing::debug!(
            stream = %self.label,
            from = batch.range.start,
            next_block = batch.next_block,
            logs = batch.logs.len(),
            "batch fetched"
        );
    }

    fn stream_completed(&self, range: BlockRange, batches: u64) {
        tracing::info!(
            stream = %self.label,
            start_block = range.start,
            end_block = range.end,
            batches,
            "log range stream completed"
        );
    }

    fn stream_failed(&self, cursor: u64, error: &BackendError) {
        tracing::error!(stream = %self.label, cursor, error = %error, "log range stream failed");
    }

    fn stream_cancelled(&self, cursor: u64) {
        tracing::info!(stream = %self.label, cursor, "log range stream cancelled");
    }

    fn stream_inactive(&self, idle: Duration, last_block: Option<u64>) {
        tracing::warn!(
            stream = %self.label,
            idle_secs = idle.as_secs(),
            latest_batch_block_received = ?last_block,
            "no batch received within the inactivity timeout"
        );
    }
}
