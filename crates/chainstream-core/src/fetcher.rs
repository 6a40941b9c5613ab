//! The backend seam: one remote request per batch.
//!
//! The controller only ever calls [`BatchFetcher::fetch`] and sees a final
//! success or failure per call. Retries live in [`RetryingFetcher`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::types::{any_matches, BatchResponse, BlockRange, LogRecord, LogSelection};

/// Fetches logs for one sub-range from the indexing backend.
///
/// Implementations must be stateless with respect to earlier calls.
#[async_trait]
pub trait BatchFetcher: Send + Sync + 'static {
    /// Fetch logs in `subrange` matching any of `selections`.
    ///
    /// The returned `next_block` is where the next request should start.
    /// It may be short of `subrange.end` if the backend stopped early.
    async fn fetch(
        &self,
        subrange: BlockRange,
        selections: &[LogSelection],
    ) -> Result<BatchResponse, BackendError>;

    /// Synchronous request check, run before a stream starts.
    fn validate(&self, _selections: &[LogSelection]) -> Result<(), BackendError> {
        Ok(())
    }

    /// Identifier used in logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl<F: BatchFetcher + ?Sized> BatchFetcher for Arc<F> {
    async fn fetch(
        &self,
        subrange: BlockRange,
        selections: &[LogSelection],
    ) -> Result<BatchResponse, BackendError> {
        (**self).fetch(subrange, selections).await
    }

    fn validate(&self, selections: &[LogSelection]) -> Result<(), BackendError> {
        (**self).validate(selections)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ─── RetryingFetcher ──────────────────────────────────────────────────────────

/// Wraps a fetcher with exponential backoff on retryable errors.
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: BatchFetcher> RetryingFetcher<F> {
    pub fn new(inner: F, config: RetryConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::new(config),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: BatchFetcher> BatchFetcher for RetryingFetcher<F> {
    async fn fetch(
        &self,
        subrange: BlockRange,
        selections: &[LogSelection],
    ) -> Result<BatchResponse, BackendError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.fetch(subrange, selections).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => match self.policy.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            backend = self.inner.name(),
                            %subrange,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying batch fetch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(
                            backend = self.inner.name(),
                            %subrange,
                            attempt,
                            error = %e,
                            "max retries exceeded"
                        );
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn validate(&self, selections: &[LogSelection]) -> Result<(), BackendError> {
        self.inner.validate(selections)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ─── MemoryFetcher ────────────────────────────────────────────────────────────

/// In-memory backend over a fixed set of logs, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    logs: Vec<LogRecord>,
}

impl MemoryFetcher {
    /// Logs are kept sorted by `(block_number, log_index)`.
    pub fn new(mut logs: Vec<LogRecord>) -> Self {
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Self { logs }
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[async_trait]
impl BatchFetcher for MemoryFetcher {
    async fn fetch(
        &self,
        subrange: BlockRange,
        selections: &[LogSelection],
    ) -> Result<BatchResponse, BackendError> {
        let logs = self
            .logs
            .iter()
            .filter(|l| subrange.contains(l.block_number) && any_matches(selections, l))
            .cloned()
            .collect();
        Ok(BatchResponse::new(subrange, subrange.end, logs))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
