//! The stream controller. Drives batch fetches for one range in a background
//! task and hands results to the consumer under ack-gated flow control.
//!
//! ```text
//! start ─► [reserve ack slot] ─► fetch [cursor, cursor+batch) ─► publish Data ─┐
//!              ▲                                                               │
//!              └────────────────────── consumer ack() ◄────────────────────────┘
//!
//! cursor == end ─► wait for outstanding acks ─► publish Completed
//! fetch error   ─► publish Failed (once)
//! cancellation  ─► stop, publish nothing
//! ```
//!
//! Every suspension point of the producer races the cancellation token.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cursor::Cursor;
use crate::error::{BackendError, StreamError};
use crate::fetcher::BatchFetcher;
use crate::observer::{StreamObserver, TracingObserver};
use crate::options::{StreamOptions, StreamState};
use crate::types::{BatchResponse, BlockRange, LogSelection};

/// One message on a stream's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// A completed batch. Must be acknowledged before the next fetch.
    Data(BatchResponse),
    /// Terminal: the backend failed. Nothing follows.
    Failed(BackendError),
    /// Terminal: the whole range was delivered and acknowledged.
    Completed,
}

impl StreamMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Result of a time-bounded wait on a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Recv {
    Message(StreamMessage),
    /// The stream was cancelled or has already delivered its terminal message.
    Closed,
    TimedOut,
}

// ─── Ack gate ─────────────────────────────────────────────────────────────────

struct AckGate {
    window: usize,
    slots: Semaphore,
    unacked: AtomicUsize,
}

impl AckGate {
    fn new(window: usize) -> Self {
        Self {
            window,
            slots: Semaphore::new(window),
            unacked: AtomicUsize::new(0),
        }
    }

    /// Take one window slot; waits while `window` batches are unacknowledged.
    async fn reserve(&self) {
        if let Ok(permit) = self.slots.acquire().await {
            permit.forget();
        }
    }

    /// Must run before the batch is sent so an ack can never race ahead of it.
    fn delivered(&self) {
        self.unacked.fetch_add(1, Ordering::SeqCst);
    }

    fn ack(&self) -> bool {
        let counted = self
            .unacked
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if counted {
            self.slots.add_permits(1);
        }
        counted
    }

    /// Waits until every delivered batch has been acknowledged.
    async fn settle(&self) {
        if let Ok(permits) = self.slots.acquire_many(self.window as u32).await {
            permits.forget();
        }
    }

    fn unacked(&self) -> usize {
        self.unacked.load(Ordering::SeqCst)
    }
}

/// Cloneable acknowledgment handle for a stream.
#[derive(Clone)]
pub struct AckHandle {
    gate: Arc<AckGate>,
}

impl AckHandle {
    /// Acknowledge the oldest unacknowledged batch.
    ///
    /// Returns `false` (and does nothing) if there is no such batch.
    pub fn ack(&self) -> bool {
        let counted = self.gate.ack();
        if !counted {
            tracing::debug!("ack without an unacknowledged batch ignored");
        }
        counted
    }

    /// Number of delivered batches still waiting for an ack.
    pub fn unacked(&self) -> usize {
        self.gate.unacked()
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("window", &self.gate.window)
            .field("unacked", &self.gate.unacked())
            .finish()
    }
}

// ─── Controller ───────────────────────────────────────────────────────────────

/// Starts range streams against one backend.
pub struct StreamController<F: ?Sized> {
    fetcher: Arc<F>,
    observer: Arc<dyn StreamObserver>,
}

impl<F: BatchFetcher + ?Sized> StreamController<F> {
    /// A controller that reports to a [`TracingObserver`].
    pub fn new(fetcher: Arc<F>) -> Self {
        let observer = Arc::new(TracingObserver::new(fetcher.name()));
        Self { fetcher, observer }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Start streaming `range`. See [`start_stream`].
    pub fn start(
        &self,
        cancel: &CancellationToken,
        range: BlockRange,
        selections: Vec<LogSelection>,
        options: StreamOptions,
    ) -> Result<LogStream, StreamError> {
        start_stream(
            cancel,
            Arc::clone(&self.fetcher),
            range,
            selections,
            options,
            Arc::clone(&self.observer),
        )
    }
}

impl<F: ?Sized> Clone for StreamController<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            observer: Arc::clone(&self.observer),
        }
    }
}

/// Validate the request and spawn the producer task for `range`.
///
/// Nothing is spawned if the range is inverted, the options are invalid, or
/// the fetcher rejects `selections`. The stream runs under a child of
/// `cancel`; cancelling the parent, calling [`LogStream::cancel`], or dropping
/// the handle all stop it.
///
/// Must be called from within a Tokio runtime.
pub fn start_stream<F>(
    cancel: &CancellationToken,
    fetcher: Arc<F>,
    range: BlockRange,
    selections: Vec<LogSelection>,
    options: StreamOptions,
    observer: Arc<dyn StreamObserver>,
) -> Result<LogStream, StreamError>
where
    F: BatchFetcher + ?Sized,
{
    if !range.is_valid() {
        return Err(StreamError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    options.validate()?;
    fetcher
        .validate(&selections)
        .map_err(StreamError::InvalidSelection)?;

    let token = cancel.child_token();
    let gate = Arc::new(AckGate::new(options.window));
    let (tx, rx) = mpsc::channel(options.window + 1);
    let (state_tx, state_rx) = watch::channel(StreamState::Running);

    observer.stream_started(range, &options);

    let producer = Producer {
        fetcher,
        selections,
        batch_size: options.batch_size,
        cursor: Cursor::new(range),
        gate: Arc::clone(&gate),
        tx,
        state: state_tx,
        cancel: token.clone(),
        observer,
    };
    let task = tokio::spawn(producer.supervise());

    Ok(LogStream {
        range,
        rx,
        ack: AckHandle { gate },
        cancel: token,
        state: state_rx,
        task: Some(task),
    })
}

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

struct Producer<F: ?Sized> {
    fetcher: Arc<F>,
    selections: Vec<LogSelection>,
    batch_size: u64,
    cursor: Cursor,
    gate: Arc<AckGate>,
    tx: mpsc::Sender<StreamMessage>,
    state: watch::Sender<StreamState>,
    cancel: CancellationToken,
    observer: Arc<dyn StreamObserver>,
}

impl<F: BatchFetcher + ?Sized> Producer<F> {
    /// Runs the stream, reporting a panic anywhere below as a backend failure.
    async fn supervise(mut self) -> StreamState {
        match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(state) => state,
            Err(panic) => self.panicked(panic).await,
        }
    }

    async fn run(&mut self) -> StreamState {
        while !self.cursor.is_done() {
            if cancellable(&self.cancel, self.gate.reserve()).await.is_none() {
                return self.cancelled();
            }

            let subrange = self.cursor.next_slice(self.batch_size);
            let fetched = cancellable(
                &self.cancel,
                self.fetcher.fetch(subrange, &self.selections),
            )
            .await;
            let batch = match fetched {
                None => return self.cancelled(),
                Some(result) => result.and_then(|batch| {
                    self.cursor.check(&batch)?;
                    Ok(batch)
                }),
            };

            match batch {
                Ok(batch) => {
                    self.observer.batch_fetched(&batch);
                    let next_block = batch.next_block;
                    self.gate.delivered();
                    if !self.publish(StreamMessage::Data(batch)).await {
                        return self.cancelled();
                    }
                    self.cursor.advance(next_block);
                }
                Err(e) => {
                    self.observer.stream_failed(self.cursor.position(), &e);
                    self.state.send_replace(StreamState::Failed);
                    if !self.publish(StreamMessage::Failed(e)).await {
                        return self.cancelled();
                    }
                    return StreamState::Failed;
                }
            }
        }

        if cancellable(&self.cancel, self.gate.settle()).await.is_none() {
            return self.cancelled();
        }
        self.state.send_replace(StreamState::Completed);
        if !self.publish(StreamMessage::Completed).await {
            return self.cancelled();
        }
        self.observer
            .stream_completed(self.cursor.range(), self.cursor.batches());
        StreamState::Completed
    }

    /// Returns `false` if the stream was cancelled or the handle dropped.
    async fn publish(&self, msg: StreamMessage) -> bool {
        matches!(
            cancellable(&self.cancel, self.tx.send(msg)).await,
            Some(Ok(()))
        )
    }

    async fn panicked(&self, panic: Box<dyn Any + Send>) -> StreamState {
        // The terminal message is already out if an observer callback
        // panicked after publishing it.
        let state = *self.state.borrow();
        if state != StreamState::Running {
            return state;
        }

        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let error = BackendError::Other(format!("stream producer panicked: {reason}"));

        self.observer.stream_failed(self.cursor.position(), &error);
        self.state.send_replace(StreamState::Failed);
        if !self.publish(StreamMessage::Failed(error)).await {
            return self.cancelled();
        }
        StreamState::Failed
    }

    fn cancelled(&self) -> StreamState {
        self.state.send_replace(StreamState::Cancelled);
        self.observer.stream_cancelled(self.cursor.position());
        StreamState::Cancelled
    }
}

// ─── LogStream ────────────────────────────────────────────────────────────────

/// Consumer side of a running stream.
///
/// Dropping the handle cancels the producer.
pub struct LogStream {
    range: BlockRange,
    rx: mpsc::Receiver<StreamMessage>,
    ack: AckHandle,
    cancel: CancellationToken,
    state: watch::Receiver<StreamState>,
    task: Option<JoinHandle<StreamState>>,
}

impl LogStream {
    /// The full range being streamed.
    pub fn range(&self) -> BlockRange {
        self.range
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the stream is cancelled (even if messages were
    /// still buffered) or after the terminal message has been received.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        cancellable(&self.cancel, self.rx.recv()).await.flatten()
    }

    /// Wait for the next message for at most `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Recv {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(msg)) => Recv::Message(msg),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::TimedOut,
        }
    }

    /// Acknowledge the oldest unacknowledged batch, letting the producer
    /// fetch the next one.
    pub fn ack(&self) -> bool {
        self.ack.ack()
    }

    pub fn ack_handle(&self) -> AckHandle {
        self.ack.clone()
    }

    /// Stop the producer. No further messages are delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The token this stream runs under.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the producer's termination state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Wait for the producer task to stop and return its final state.
    ///
    /// Only returns once the stream has terminated or been cancelled; while
    /// the producer waits for an ack, this waits too.
    pub async fn join(mut self) -> StreamState {
        match self.task.take() {
            Some(task) => task.await.unwrap_or(StreamState::Failed),
            None => self.state(),
        }
    }

    /// Turn the handle into a `futures::Stream` of messages.
    ///
    /// Take an [`AckHandle`] first; the stream stalls until batches are acked.
    pub fn into_stream(self) -> impl Stream<Item = StreamMessage> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|msg| (msg, stream))
        })
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("range", &self.range)
            .field("state", &self.state())
            .field("ack", &self.ack)
            .finish()
    }
}
