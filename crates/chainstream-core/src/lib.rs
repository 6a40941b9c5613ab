//! chainstream-core: ack-gated, cancellable range streaming of blockchain logs.
//!
//! # Architecture
//!
//! ```text
//! StreamController::start ──► LogStream (handle)
//!        │                       ├── recv() / recv_timeout()  ◄── StreamMessage queue
//!        │                       ├── ack()                    ──► AckGate (window)
//!        │                       └── cancel()                 ──► CancellationToken
//!        └── producer task
//!              ├── Cursor        (next unconsumed block)
//!              ├── BatchFetcher  (one backend request per batch; RetryingFetcher adds backoff)
//!              └── StreamObserver (lifecycle reporting)
//!
//! StreamConsumer::run(stream, handler): inactivity deadline + BatchHandler + ack
//! ```

pub mod consumer;
pub mod controller;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod observer;
pub mod options;
pub mod retry;
pub mod types;

pub use consumer::{BatchHandler, ConsumerConfig, LogTally, StreamConsumer, StreamSummary, TimeoutPolicy};
pub use controller::{start_stream, AckHandle, LogStream, Recv, StreamController, StreamMessage};
pub use cursor::Cursor;
pub use error::{BackendError, StreamError};
pub use fetcher::{BatchFetcher, MemoryFetcher, RetryingFetcher};
pub use observer::{NoopObserver, StreamObserver, TracingObserver};
pub use options::{StreamOptions, StreamState};
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{BatchResponse, BlockRange, LogRecord, LogSelection};
