//! Consumer loop: waits on a stream with an inactivity deadline, hands each
//! batch to a [`BatchHandler`], and acknowledges it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::controller::{LogStream, Recv, StreamMessage};
use crate::error::{BackendError, StreamError};
use crate::observer::{StreamObserver, TracingObserver};
use crate::types::BatchResponse;

/// Default inactivity deadline between two stream messages.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(150);

/// What the consumer does when the inactivity deadline passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// Cancel the stream and return [`StreamError::Inactive`].
    #[default]
    Cancel,
    /// Report the stall and keep waiting.
    Warn,
}

impl std::str::FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cancel" => Ok(Self::Cancel),
            "warn" => Ok(Self::Warn),
            other => Err(format!("unknown timeout policy '{other}' (expected cancel|warn)")),
        }
    }
}

impl std::fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancel => write!(f, "cancel"),
            Self::Warn => write!(f, "warn"),
        }
    }
}

/// Consumer-side liveness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Longest wait for the next message; restarts after every message.
    #[serde(with = "crate::retry::millis")]
    pub inactivity_timeout: Duration,
    pub on_timeout: TimeoutPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            on_timeout: TimeoutPolicy::default(),
        }
    }
}

/// Per-batch processing hook.
///
/// Logs are passed in backend order. Returning an error cancels the stream.
#[async_trait]
pub trait BatchHandler: Send {
    async fn handle(&mut self, batch: &BatchResponse) -> Result<(), StreamError>;
}

/// Totals for a stream that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub batches: u64,
    pub logs: u64,
    /// `next_block` of the last batch received.
    pub last_block: Option<u64>,
    pub elapsed: Duration,
}

/// Drives a [`LogStream`] to its end.
pub struct StreamConsumer {
    config: ConsumerConfig,
    observer: Arc<dyn StreamObserver>,
}

impl StreamConsumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            observer: Arc::new(TracingObserver::new("consumer")),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Receive, handle and acknowledge batches until the stream terminates.
    ///
    /// - `Completed` → `Ok(summary)`
    /// - `Failed(e)` → `Err(StreamError::Backend(e))`
    /// - stream cancelled → `Err(StreamError::Cancelled)`
    /// - stream closed without a terminal message otherwise → `Err(StreamError::Backend)`
    /// - deadline passed under [`TimeoutPolicy::Cancel`] → `Err(StreamError::Inactive)`
    pub async fn run<H>(
        &self,
        stream: &mut LogStream,
        handler: &mut H,
    ) -> Result<StreamSummary, StreamError>
    where
        H: BatchHandler + ?Sized,
    {
        let started = Instant::now();
        let mut summary = StreamSummary::default();

        loop {
            match stream.recv_timeout(self.config.inactivity_timeout).await {
                Recv::Message(StreamMessage::Data(batch)) => {
                    if let Err(e) = handler.handle(&batch).await {
                        stream.cancel();
                        return Err(e);
                    }
                    summary.batches += 1;
                    summary.logs += batch.logs.len() as u64;
                    summary.last_block = Some(batch.next_block);
                    stream.ack();
                }
                Recv::Message(StreamMessage::Completed) => {
                    summary.elapsed = started.elapsed();
                    return Ok(summary);
                }
                Recv::Message(StreamMessage::Failed(e)) => return Err(StreamError::Backend(e)),
                Recv::Closed if stream.is_cancelled() => return Err(StreamError::Cancelled),
                Recv::Closed => {
                    return Err(StreamError::Backend(BackendError::Other(
                        "stream closed without a terminal message".into(),
                    )))
                }
                Recv::TimedOut => {
                    let idle = self.config.inactivity_timeout;
                    self.observer.stream_inactive(idle, summary.last_block);
                    if self.config.on_timeout == TimeoutPolicy::Cancel {
                        stream.cancel();
                        return Err(StreamError::Inactive { idle });
                    }
                }
            }
        }
    }
}

// ─── LogTally ─────────────────────────────────────────────────────────────────

/// Stock handler: counts logs and the distinct blocks they came from.
#[derive(Debug, Clone, Default)]
pub struct LogTally {
    pub logs: u64,
    pub blocks: BTreeSet<u64>,
    /// Cursor reached by the most recent batch.
    pub latest_batch_block: Option<u64>,
}

impl LogTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distinct_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[async_trait]
impl BatchHandler for LogTally {
    async fn handle(&mut self, batch: &BatchResponse) -> Result<(), StreamError> {
        self.logs += batch.logs.len() as u64;
        self.blocks.extend(batch.logs.iter().map(|l| l.block_number));
        self.latest_batch_block = Some(batch.next_block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::start_stream;
    use crate::fetcher::{BatchFetcher, MemoryFetcher};
    use crate::observer::NoopObserver;
    use crate::options::{StreamOptions, StreamState};
    use crate::types::{BlockRange, LogRecord, LogSelection};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Sleeps `delay` before answering every fetch.
    struct Slow {
        delay: Duration,
    }

    #[async_trait]
    impl BatchFetcher for Slow {
        async fn fetch(
            &self,
            subrange: BlockRange,
            _selections: &[LogSelection],
        ) -> Result<BatchResponse, BackendError> {
            tokio::time::sleep(self.delay).await;
            Ok(BatchResponse::new(subrange, subrange.end, vec![]))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[derive(Default)]
    struct Stalls(Mutex<Vec<Option<u64>>>);

    impl StreamObserver for Stalls {
        fn stream_inactive(&self, _idle: Duration, last_block: Option<u64>) {
            self.0.lock().unwrap().push(last_block);
        }
    }

    fn log_at(block: u64) -> LogRecord {
        LogRecord {
            block_number: block,
            ..Default::default()
        }
    }

    fn open<F: BatchFetcher>(fetcher: F, range: BlockRange, batch_size: u64) -> LogStream {
        start_stream(
            &CancellationToken::new(),
            Arc::new(fetcher),
            range,
            vec![LogSelection::all()],
            StreamOptions::with_batch_size(batch_size),
            Arc::new(NoopObserver),
        )
        .unwrap()
    }

    #[test]
    fn timeout_policy_parse() {
        assert_eq!("warn".parse::<TimeoutPolicy>().unwrap(), TimeoutPolicy::Warn);
        assert_eq!("CANCEL".parse::<TimeoutPolicy>().unwrap(), TimeoutPolicy::Cancel);
        assert!("abort".parse::<TimeoutPolicy>().is_err());
    }

    #[test]
    fn consumer_config_defaults() {
        let cfg: ConsumerConfig = serde_json::from_str(r#"{"on_timeout": "warn"}"#).unwrap();
        assert_eq!(cfg.inactivity_timeout, Duration::from_secs(150));
        assert_eq!(cfg.on_timeout, TimeoutPolicy::Warn);
    }

    #[tokio::test]
    async fn tally_counts_logs_and_distinct_blocks() {
        let fetcher = MemoryFetcher::new(vec![log_at(101), log_at(101), log_at(150), log_at(260)]);
        let mut stream = open(fetcher, BlockRange::new(100, 300), 100);
        let mut tally = LogTally::new();

        let summary = StreamConsumer::new(ConsumerConfig::default())
            .with_observer(Arc::new(NoopObserver))
            .run(&mut stream, &mut tally)
            .await
            .unwrap();

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.logs, 4);
        assert_eq!(summary.last_block, Some(300));
        assert_eq!(tally.logs, 4);
        assert_eq!(tally.distinct_blocks(), 3);
        assert_eq!(tally.latest_batch_block, Some(300));
        assert_eq!(stream.state(), StreamState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_policy_abandons_stalled_stream() {
        let mut stream = open(Slow { delay: Duration::from_secs(3600) }, BlockRange::new(0, 10), 10);
        let stalls = Arc::new(Stalls::default());
        let consumer = StreamConsumer::new(ConsumerConfig {
            inactivity_timeout: Duration::from_secs(10),
            on_timeout: TimeoutPolicy::Cancel,
        })
        .with_observer(stalls.clone());

        let err = consumer.run(&mut stream, &mut LogTally::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Inactive { idle } if idle == Duration::from_secs(10)));
        assert!(stream.is_cancelled());
        assert_eq!(*stalls.0.lock().unwrap(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn warn_policy_keeps_waiting() {
        let mut stream = open(Slow { delay: Duration::from_secs(25) }, BlockRange::new(0, 10), 10);
        let stalls = Arc::new(Stalls::default());
        let consumer = StreamConsumer::new(ConsumerConfig {
            inactivity_timeout: Duration::from_secs(10),
            on_timeout: TimeoutPolicy::Warn,
        })
        .with_observer(stalls.clone());

        let summary = consumer.run(&mut stream, &mut LogTally::new()).await.unwrap();
        assert_eq!(summary.batches, 1);
        assert_eq!(stalls.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn handler_error_cancels_stream() {
        struct Reject;

        #[async_trait]
        impl BatchHandler for Reject {
            async fn handle(&mut self, _batch: &BatchResponse) -> Result<(), StreamError> {
                Err(StreamError::Handler("sink unavailable".into()))
            }
        }

        let mut stream = open(MemoryFetcher::default(), BlockRange::new(0, 100), 10);
        let err = StreamConsumer::new(ConsumerConfig::default())
            .with_observer(Arc::new(NoopObserver))
            .run(&mut stream, &mut Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Handler(_)));
        assert!(stream.is_cancelled());
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn panicking_fetcher_is_a_failure_not_a_cancellation() {
        struct Broken;

        #[async_trait]
        impl BatchFetcher for Broken {
            async fn fetch(
                &self,
                _subrange: BlockRange,
                _selections: &[LogSelection],
            ) -> Result<BatchResponse, BackendError> {
                panic!("decoder bug")
            }

            fn name(&self) -> &str {
                "broken"
            }
        }

        let mut stream = open(Broken, BlockRange::new(0, 10), 10);
        let err = StreamConsumer::new(ConsumerConfig::default())
            .with_observer(Arc::new(NoopObserver))
            .run(&mut stream, &mut LogTally::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, StreamError::Backend(BackendError::Other(ref msg)) if msg.contains("decoder bug")),
            "got {err:?}"
        );
        assert!(!err.is_cancellation());
        assert!(!stream.is_cancelled());
    }

    #[tokio::test]
    async fn externally_cancelled_stream_reports_cancelled() {
        let mut stream = open(Slow { delay: Duration::from_secs(3600) }, BlockRange::new(0, 10), 10);
        stream.cancel();
        let err = StreamConsumer::new(ConsumerConfig::default())
            .with_observer(Arc::new(NoopObserver))
            .run(&mut stream, &mut LogTally::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Cancelled));
    }
}
