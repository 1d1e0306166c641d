#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use courier_core::{
    SnapshotError, StoreError,
    broadcast::{SendError, SubscriberConnection},
    snapshot::SnapshotStore,
    store::{MemoryMessageStore, MessageStore},
    writer::WriterConfig,
};
use courier_model::{Message, MessageId};
use tokio::sync::Semaphore;

/// Message with a deterministic, strictly increasing timestamp.
pub fn message(index: i64) -> Message {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Message::at(
        format!("m{index}"),
        base + chrono::Duration::milliseconds(index),
    )
}

pub fn contents(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.content.clone()).collect()
}

pub fn writer_config(batch_size: usize, batch_timeout_ms: u64) -> WriterConfig {
    WriterConfig {
        batch_size,
        batch_timeout: Duration::from_millis(batch_timeout_ms),
        max_retry_attempts: 3,
        base_retry_delay: Duration::from_millis(100),
        max_content_length: 1_000,
    }
}

/// Let spawned tasks run without moving the clock meaningfully.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Memory store with scripted failures, an optional gate that holds inserts,
/// and a record of every batch it was asked to insert.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    inner: MemoryMessageStore,
    failures_remaining: AtomicUsize,
    panics_remaining: AtomicUsize,
    calls: Mutex<Vec<Vec<String>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert waits for a [`ScriptedStore::release`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// The next `count` inserts panic instead of returning.
    pub fn panic_next(&self, count: usize) {
        self.panics_remaining.store(count, Ordering::SeqCst);
    }

    pub fn release(&self, inserts: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(inserts);
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Readable after close, unlike `list_all`.
    pub fn persisted_len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl MessageStore for ScriptedStore {
    async fn bulk_insert(
        &self,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, StoreError> {
        self.calls.lock().unwrap().push(contents(messages));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self
            .panics_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            panic!("scripted store panic");
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }

        let result = if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            Err(StoreError::Unavailable("scripted failure".into()))
        } else {
            self.inner.bulk_insert(messages).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn list_all(&self) -> Result<Vec<Message>, StoreError> {
        self.inner.list_all().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[derive(Debug, Default)]
pub struct MemorySnapshots {
    slot: Mutex<Option<Vec<Message>>>,
}

#[async_trait]
impl SnapshotStore for MemorySnapshots {
    async fn write(&self, messages: &[Message]) -> Result<(), SnapshotError> {
        *self.slot.lock().unwrap() = Some(messages.to_vec());
        Ok(())
    }

    async fn read(&self) -> Result<Option<Vec<Message>>, SnapshotError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    async fn delete(&self) -> Result<(), SnapshotError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }
}

/// Subscriber connection that records what it was sent.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    received: Mutex<Vec<String>>,
    pings: AtomicUsize,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SubscriberConnection for RecordingConnection {
    fn send(&self, payload: Arc<str>) -> Result<(), SendError> {
        if self.fail_sends.load(Ordering::SeqCst) || self.is_closed() {
            return Err(SendError::Closed);
        }
        self.received.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    fn ping(&self) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
