//! # Buffered writer
//!
//! Accepts messages one at a time, holds them in an in-memory pending queue,
//! and persists them to a [`MessageStore`] in batches.
//!
//! ## Flush policy
//!
//! - A flush never starts while another one is in flight. Submissions made
//!   during a flush only append to the pending queue.
//! - The first message into an empty queue arms the batch timer.
//! - Reaching `batch_size` cancels the timer and flushes immediately.
//! - When the timer fires the whole queue is flushed, however short.
//!
//! ## Flush cycle
//!
//! The pending queue is swapped out as the batch under the state lock, so
//! arrivals during the insert land in a fresh queue. On success every
//! registered persisted-handler sees each message, with its store-assigned id,
//! in batch order. On failure the batch goes back to the front of the queue
//! and a retry is scheduled after `attempt * base_retry_delay`. Once the retry
//! budget is spent the failure is published as [`FlushExhausted`] on
//! [`BufferedWriter::failures`] and the messages stay queued.
//!
//! A flush that unwinds (a panicking store or persisted-handler) still
//! releases the in-progress flag and wakes a waiting shutdown. A batch the
//! store never acknowledged returns to the front of the queue.
//!
//! At most one scheduled flush (batch timer or retry) is outstanding. Every
//! path that starts a flush cancels it first, and a timer that loses the race
//! with its own cancellation is ignored by id.
//!
//! ## Recovery
//!
//! [`BufferedWriter::shutdown`] writes whatever is still pending to the
//! [`SnapshotStore`]. [`BufferedWriter::start`] loads that snapshot back,
//! removes it, and arms the batch timer.

mod config;

pub use config::WriterConfig;

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use courier_model::{Message, MessageId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{
    runtime::Handle,
    sync::{Notify, broadcast},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{FlushExhausted, Result, StoreError, WriterError},
    snapshot::SnapshotStore,
    store::MessageStore,
};

const FAILURE_CHANNEL_CAPACITY: usize = 16;

/// Callback invoked once per persisted message.
///
/// Runs on the flush path, so it must hand work off rather than block.
pub type PersistedHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// What started a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timeout,
    Retry { attempt: u32 },
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushTrigger::Size => write!(f, "size"),
            FlushTrigger::Timeout => write!(f, "timeout"),
            FlushTrigger::Retry { attempt } => write!(f, "retry-{attempt}"),
        }
    }
}

/// Point-in-time counters for the writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub pending: usize,
    pub flush_in_progress: bool,
    pub retry_attempts: u32,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub persisted: u64,
}

#[derive(Debug)]
struct ScheduledFlush {
    id: u64,
    trigger: FlushTrigger,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct WriterState {
    pending: VecDeque<Message>,
    flushing: bool,
    scheduled: Option<ScheduledFlush>,
    retry_attempts: u32,
    schedule_seq: u64,
    closed: bool,
}

impl WriterState {
    fn cancel_scheduled(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            scheduled.cancel.cancel();
        }
    }
}

struct WriterInner {
    config: WriterConfig,
    store: Arc<dyn MessageStore>,
    snapshots: Arc<dyn SnapshotStore>,
    state: Mutex<WriterState>,
    handlers: RwLock<Vec<PersistedHandler>>,
    failures: broadcast::Sender<FlushExhausted>,
    flush_done: Notify,
    runtime: Handle,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    persisted: AtomicU64,
}

/// Cheaply cloneable handle to the buffered writer.
#[derive(Clone)]
pub struct BufferedWriter {
    inner: Arc<WriterInner>,
}

impl fmt::Debug for BufferedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.try_lock();
        f.debug_struct("BufferedWriter")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .field("snapshots", &self.inner.snapshots)
            .field("pending", &state.as_ref().map(|s| s.pending.len()))
            .field("flushing", &state.as_ref().map(|s| s.flushing))
            .field("handlers", &self.inner.handlers.read().len())
            .finish()
    }
}

impl BufferedWriter {
    /// Build the writer and replay any recovery snapshot left by the
    /// previous process. Must be called from within a tokio runtime.
    pub async fn start(
        config: WriterConfig,
        store: Arc<dyn MessageStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Result<Self> {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        let inner = Arc::new(WriterInner {
            config,
            store,
            snapshots,
            state: Mutex::new(WriterState::default()),
            handlers: RwLock::new(Vec::new()),
            failures,
            flush_done: Notify::new(),
            runtime: Handle::current(),
            flushes: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
        });

        let writer = Self { inner };
        writer.recover().await?;
        Ok(writer)
    }

    async fn recover(&self) -> Result<()> {
        let recovered = match self.inner.snapshots.read().await {
            Ok(None) => return Ok(()),
            Ok(Some(messages)) => {
                // A snapshot that survives its own load would be replayed on
                // every start.
                self.inner.snapshots.delete().await?;
                messages
            }
            Err(err) => {
                error!(
                    error = %err,
                    "recovery snapshot unreadable; abandoning recovery"
                );
                if let Err(delete_err) = self.inner.snapshots.delete().await {
                    error!(
                        error = %delete_err,
                        "failed to remove unreadable recovery snapshot"
                    );
                }
                return Ok(());
            }
        };

        if recovered.is_empty() {
            return Ok(());
        }

        info!(
            recovered = recovered.len(),
            "recovered pending messages from snapshot"
        );
        let mut state = self.inner.state.lock();
        state.pending.extend(recovered);
        self.inner.arm(
            &mut state,
            FlushTrigger::Timeout,
            self.inner.config.batch_timeout,
        );
        Ok(())
    }

    /// Queue `message` for persistence. Returns once it is buffered, not
    /// once it is stored.
    pub fn submit(&self, message: Message) -> Result<()> {
        message.validate(self.inner.config.max_content_length)?;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(WriterError::StoreUnavailable);
        }
        state.pending.push_back(message);
        self.inner.apply_policy(&mut state);
        Ok(())
    }

    /// Persisted messages only; anything still buffered is not included.
    pub async fn list_all(&self) -> Result<Vec<Message>> {
        Ok(self.inner.store.list_all().await?)
    }

    /// Register `handler` to run for every persisted message. Handlers run in
    /// registration order.
    pub fn on_persisted<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.handlers.write().push(Arc::new(handler));
    }

    /// Stream of retry-exhaustion failures.
    pub fn failures(&self) -> broadcast::Receiver<FlushExhausted> {
        self.inner.failures.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Copy of the pending queue in arrival order.
    pub fn pending(&self) -> Vec<Message> {
        self.inner.state.lock().pending.iter().cloned().collect()
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.inner.state.lock();
        WriterStats {
            pending: state.pending.len(),
            flush_in_progress: state.flushing,
            retry_attempts: state.retry_attempts,
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            failed_flushes: self.inner.failed_flushes.load(Ordering::Relaxed),
            persisted: self.inner.persisted.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting messages, let an in-flight flush finish, write the
    /// recovery snapshot when anything is still pending, and close the store.
    ///
    /// Returns the number of messages written to the snapshot. Calls after
    /// the first return `Ok(0)` without touching anything.
    pub async fn shutdown(&self) -> Result<usize> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(0);
            }
            state.closed = true;
            state.cancel_scheduled();
        }

        loop {
            let notified = self.inner.flush_done.notified();
            if !self.inner.state.lock().flushing {
                break;
            }
            notified.await;
        }

        let pending: Vec<Message> =
            self.inner.state.lock().pending.drain(..).collect();
        let saved = pending.len();

        let outcome = if pending.is_empty() {
            Ok(())
        } else {
            match self.inner.snapshots.write(&pending).await {
                Ok(()) => {
                    info!(messages = saved, "wrote recovery snapshot");
                    Ok(())
                }
                Err(err) => {
                    error!(
                        error = %err,
                        messages = saved,
                        "failed to write recovery snapshot; pending messages are lost"
                    );
                    Err(err)
                }
            }
        };

        self.inner.store.close().await;
        outcome?;
        Ok(saved)
    }
}

impl WriterInner {
    /// Size/time policy. Callers hold the state lock.
    fn apply_policy(self: &Arc<Self>, state: &mut WriterState) {
        if state.closed || state.flushing || state.pending.is_empty() {
            return;
        }

        if state.pending.len() >= self.config.batch_size {
            self.begin_flush(state, FlushTrigger::Size);
        } else if state.scheduled.is_none() {
            self.arm(state, FlushTrigger::Timeout, self.config.batch_timeout);
        }
    }

    /// Claim the in-progress flag and run the flush on the runtime.
    fn begin_flush(self: &Arc<Self>, state: &mut WriterState, trigger: FlushTrigger) {
        state.flushing = true;
        state.cancel_scheduled();

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            if let Err(exhausted) = inner.flush(trigger).await {
                warn!(
                    attempts = exhausted.attempts,
                    pending = exhausted.pending,
                    reason = %exhausted.reason,
                    "flush retries exhausted"
                );
                let _ = inner.failures.send(exhausted);
            }
        });
    }

    /// Replace the outstanding scheduled flush with one that fires after
    /// `delay`.
    fn arm(
        self: &Arc<Self>,
        state: &mut WriterState,
        trigger: FlushTrigger,
        delay: Duration,
    ) {
        state.cancel_scheduled();
        state.schedule_seq += 1;
        let id = state.schedule_seq;
        let cancel = CancellationToken::new();
        state.scheduled = Some(ScheduledFlush {
            id,
            trigger,
            cancel: cancel.clone(),
        });

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.fire(id),
            }
        });
    }

    fn fire(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        let trigger = match state.scheduled.as_ref() {
            Some(scheduled) if scheduled.id == id => scheduled.trigger,
            _ => return,
        };
        state.scheduled = None;

        if state.closed || state.flushing || state.pending.is_empty() {
            return;
        }
        self.begin_flush(&mut state, trigger);
    }

    async fn flush(
        self: &Arc<Self>,
        trigger: FlushTrigger,
    ) -> std::result::Result<(), FlushExhausted> {
        let mut in_flight = InFlight::new(self);
        in_flight.batch = {
            let mut state = self.state.lock();
            state.cancel_scheduled();
            state.pending.drain(..).collect()
        };

        if in_flight.batch.is_empty() {
            self.state.lock().flushing = false;
            in_flight.disarm();
            self.flush_done.notify_waiters();
            return Ok(());
        }

        debug!(
            %trigger,
            batch_size = in_flight.batch.len(),
            "flushing message batch"
        );

        let inserted = match self.store.bulk_insert(&in_flight.batch).await {
            Ok(ids) if ids.len() == in_flight.batch.len() => Ok(ids),
            Ok(ids) => Err(StoreError::IdCountMismatch {
                expected: in_flight.batch.len(),
                actual: ids.len(),
            }),
            Err(err) => Err(err),
        };

        // Acknowledged or handed to the failure path; a later unwind must
        // not queue it again.
        let batch = std::mem::take(&mut in_flight.batch);
        let result = match inserted {
            Ok(ids) => {
                self.publish(batch, ids);
                self.complete_success();
                Ok(())
            }
            Err(err) => self.complete_failure(batch, err),
        };

        in_flight.disarm();
        self.flush_done.notify_waiters();
        result
    }

    fn publish(&self, batch: Vec<Message>, ids: Vec<MessageId>) {
        let handlers: Vec<PersistedHandler> = self.handlers.read().clone();
        let count = batch.len() as u64;

        for (message, id) in batch.into_iter().zip(ids) {
            let persisted = message.with_id(id);
            for handler in &handlers {
                handler(&persisted);
            }
        }

        self.persisted.fetch_add(count, Ordering::Relaxed);
    }

    fn complete_success(self: &Arc<Self>) {
        self.flushes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        state.retry_attempts = 0;
        state.flushing = false;
        // Messages that arrived mid-flush start their own cycle.
        self.apply_policy(&mut state);
    }

    fn complete_failure(
        self: &Arc<Self>,
        batch: Vec<Message>,
        err: StoreError,
    ) -> std::result::Result<(), FlushExhausted> {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        let arrived = std::mem::take(&mut state.pending);
        state.pending = batch.into_iter().chain(arrived).collect();
        state.flushing = false;

        if state.closed {
            warn!(
                error = %err,
                pending = state.pending.len(),
                "flush failed during shutdown; batch kept for the recovery snapshot"
            );
            return Ok(());
        }

        if state.retry_attempts < self.config.max_retry_attempts {
            state.retry_attempts += 1;
            let attempt = state.retry_attempts;
            let delay = self.config.retry_delay(attempt);
            warn!(
                error = %err,
                attempt,
                max_attempts = self.config.max_retry_attempts,
                ?delay,
                pending = state.pending.len(),
                "flush failed; retry scheduled"
            );
            self.arm(&mut state, FlushTrigger::Retry { attempt }, delay);
            return Ok(());
        }

        let exhausted = FlushExhausted {
            attempts: state.retry_attempts,
            pending: state.pending.len(),
            reason: err.to_string(),
        };
        state.retry_attempts = 0;
        Err(exhausted)
    }
}

/// Releases the in-progress flag if a flush unwinds before completing.
///
/// A batch still held here was never acknowledged by the store and goes
/// back to the front of the queue. It is retried on the next submission.
struct InFlight<'a> {
    inner: &'a WriterInner,
    batch: Vec<Message>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(inner: &'a WriterInner) -> Self {
        Self {
            inner,
            batch: Vec::new(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let requeued = self.batch.len();
        {
            let mut state = self.inner.state.lock();
            if requeued > 0 {
                let arrived = std::mem::take(&mut state.pending);
                state.pending = std::mem::take(&mut self.batch)
                    .into_iter()
                    .chain(arrived)
                    .collect();
            }
            state.flushing = false;
        }
        if requeued > 0 {
            self.inner.failed_flushes.fetch_add(1, Ordering::Relaxed);
        }
        error!(requeued, "flush aborted before completing");
        self.inner.flush_done.notify_waiters();
    }
}
