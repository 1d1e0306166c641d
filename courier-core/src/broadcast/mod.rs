//! Real-time fan-out of persisted messages to live subscribers.
//!
//! Membership changes when a subscriber connects, when its transport reports
//! closure, when a send fails, or when it stops answering liveness probes.
//! Broadcasts and sweeps iterate over a snapshot of the membership, so
//! evictions in the middle of a pass never disturb it.

mod config;
mod connection;

pub use config::BroadcastConfig;
pub use connection::{SendError, SubscriberConnection};

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use courier_model::Message;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    connection: Arc<dyn SubscriberConnection>,
    /// Cleared by each sweep, set again when the transport sees a pong.
    alive: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
enum EvictReason {
    SendFailed(SendError),
    ProbeFailed(SendError),
    Unresponsive,
    Disconnected,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictReason::SendFailed(err) => write!(f, "send failed: {err}"),
            EvictReason::ProbeFailed(err) => write!(f, "probe failed: {err}"),
            EvictReason::Unresponsive => write!(f, "missed liveness probe"),
            EvictReason::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Outcome of one [`Broadcaster::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Outcome of one liveness sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub delivered: u64,
    pub send_failures: u64,
    pub evictions: u64,
}

struct BroadcasterInner {
    config: BroadcastConfig,
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    delivered: AtomicU64,
    send_failures: AtomicU64,
    evictions: AtomicU64,
    shutdown: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("config", &self.inner.config)
            .field("subscriber_count", &self.inner.subscribers.len())
            .field(
                "send_failures",
                &self.inner.send_failures.load(Ordering::Relaxed),
            )
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

/// Handle returned by [`Broadcaster::subscribe`], held by the transport.
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    registry: Weak<BroadcasterInner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.subscriber.id)
            .field("alive", &self.subscriber.alive.load(Ordering::Relaxed))
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.subscriber.id
    }

    /// Record a probe response from the transport.
    pub fn mark_alive(&self) {
        self.subscriber.alive.store(true, Ordering::Release);
    }

    /// Whether the broadcaster still delivers to this subscriber.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|inner| inner.subscribers.contains_key(&self.subscriber.id))
    }

    /// Leave the live set after a connection-initiated close.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.evict(self.subscriber.id, EvictReason::Disconnected);
        }
    }
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                config,
                subscribers: DashMap::new(),
                delivered: AtomicU64::new(0),
                send_failures: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                sweep_task: Mutex::new(None),
            }),
        }
    }

    /// Spawn the liveness sweep. The first sweep runs one full
    /// `heartbeat_interval` after this call. Calling again is a no-op.
    pub fn start(&self) {
        let mut guard = self.inner.sweep_task.lock();
        if guard.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *guard = Some(tokio::spawn(liveness_sweep_loop(inner)));
    }

    /// Add `connection` to the live set, initially considered alive.
    pub fn subscribe(
        &self,
        connection: Arc<dyn SubscriberConnection>,
    ) -> Subscription {
        let subscriber = Arc::new(Subscriber {
            id: Uuid::now_v7(),
            connection,
            alive: AtomicBool::new(true),
        });
        self.inner
            .subscribers
            .insert(subscriber.id, Arc::clone(&subscriber));
        debug!(
            subscriber = %subscriber.id,
            subscribers = self.inner.subscribers.len(),
            "subscriber connected"
        );

        Subscription {
            subscriber,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Serialize `message` once and send it to every current subscriber.
    /// A failed send evicts that subscriber and delivery continues.
    pub fn broadcast(&self, message: &Message) -> BroadcastReport {
        let payload: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => Arc::from(json),
            Err(err) => {
                error!(error = %err, "failed to serialize message for broadcast");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for subscriber in self.inner.snapshot() {
            match subscriber.connection.send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    self.inner.send_failures.fetch_add(1, Ordering::Relaxed);
                    subscriber.connection.close();
                    if self.inner.evict(subscriber.id, EvictReason::SendFailed(err)) {
                        report.evicted += 1;
                    }
                }
            }
        }

        self.inner
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        report
    }

    /// Run one liveness pass immediately.
    pub fn sweep(&self) -> SweepReport {
        self.inner.sweep()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn is_subscribed(&self, id: Uuid) -> bool {
        self.inner.subscribers.contains_key(&id)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.inner.subscribers.len(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            send_failures: self.inner.send_failures.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    /// Token cancelled by [`Broadcaster::shutdown`]; the transport listener
    /// uses it to stop accepting connections.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    /// Stop the sweep, release the listener, and close connections on a
    /// best-effort basis.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let task = self.inner.sweep_task.lock().take();
        if let Some(task) = task
            && let Err(err) = task.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "liveness sweep task ended abnormally");
        }

        for subscriber in self.inner.snapshot() {
            subscriber.connection.close();
        }
        self.inner.subscribers.clear();
        info!("broadcaster shut down");
    }
}

impl BroadcasterInner {
    fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove `id`; false when it was already gone.
    fn evict(&self, id: Uuid, reason: EvictReason) -> bool {
        if self.subscribers.remove(&id).is_none() {
            return false;
        }

        match reason {
            EvictReason::Disconnected => {
                debug!(subscriber = %id, "subscriber disconnected");
            }
            _ => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                warn!(subscriber = %id, %reason, "evicted subscriber");
            }
        }
        true
    }

    fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for subscriber in self.snapshot() {
            if !subscriber.alive.swap(false, Ordering::AcqRel) {
                subscriber.connection.close();
                if self.evict(subscriber.id, EvictReason::Unresponsive) {
                    report.evicted += 1;
                }
                continue;
            }

            match subscriber.connection.ping() {
                Ok(()) => report.probed += 1,
                Err(err) => {
                    self.send_failures.fetch_add(1, Ordering::Relaxed);
                    subscriber.connection.close();
                    if self.evict(subscriber.id, EvictReason::ProbeFailed(err)) {
                        report.evicted += 1;
                    }
                }
            }
        }

        report
    }
}

async fn liveness_sweep_loop(inner: Arc<BroadcasterInner>) {
    let period = inner.config.heartbeat_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = inner.sweep();
        if report.evicted > 0 {
            info!(
                probed = report.probed,
                evicted = report.evicted,
                "liveness sweep evicted stale subscribers"
            );
        }
    }
}
