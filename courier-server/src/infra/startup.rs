//! Builds the writer and broadcaster from configuration and tears them down
//! in order.

use std::sync::Arc;

use anyhow::Context;
use courier_core::{
    broadcast::Broadcaster,
    snapshot::FileSnapshotStore,
    store::{MemoryMessageStore, MessageStore, PostgresMessageStore},
    writer::BufferedWriter,
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{error, info, warn};

use crate::infra::config::{Config, StoreBackend, validation::redact_credentials};

/// Opens the store named by `store.url`. Postgres stores run pending
/// migrations on connect.
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn MessageStore>> {
    match config.store.backend() {
        Some(StoreBackend::Postgres(url)) => {
            let store = PostgresMessageStore::connect(
                &url,
                config.store.max_connections,
            )
            .await
            .with_context(|| {
                format!(
                    "failed to connect to PostgreSQL at {}",
                    redact_credentials(&url)
                )
            })?;
            Ok(Arc::new(store))
        }
        Some(StoreBackend::Memory) => {
            warn!("using in-memory message store; nothing survives a restart");
            Ok(Arc::new(MemoryMessageStore::new()))
        }
        None => Err(anyhow::anyhow!(
            "unsupported store URL {}",
            redact_credentials(&config.store.url)
        )),
    }
}

/// Writer and broadcaster wired together.
#[derive(Debug)]
pub struct Services {
    pub writer: BufferedWriter,
    pub broadcaster: Broadcaster,
    failure_watch: JoinHandle<()>,
}

impl Services {
    /// Start the writer on `store`, start the broadcaster, and route every
    /// persisted message into the broadcaster.
    pub async fn start(
        config: &Config,
        store: Arc<dyn MessageStore>,
    ) -> anyhow::Result<Self> {
        let snapshots = Arc::new(FileSnapshotStore::new(
            &config.writer.recovery_snapshot_path,
        ));
        let writer = BufferedWriter::start(
            config.writer.writer_config(),
            store,
            snapshots,
        )
        .await
        .context("failed to start buffered writer")?;

        let broadcaster = Broadcaster::new(config.broadcast.broadcast_config());
        broadcaster.start();

        let fanout = broadcaster.clone();
        writer.on_persisted(move |message| {
            fanout.broadcast(message);
        });

        let failure_watch = tokio::spawn(watch_flush_failures(writer.clone()));

        info!(
            writer.batch_size = config.writer.batch_size,
            writer.batch_timeout = ?config.writer.batch_timeout,
            writer.max_retry_attempts = config.writer.max_retry_attempts,
            writer.pending = writer.pending_len(),
            broadcast.heartbeat_interval = ?config.broadcast.heartbeat_interval,
            "writer and broadcaster started"
        );

        Ok(Self {
            writer,
            broadcaster,
            failure_watch,
        })
    }

    /// Broadcaster first so no subscriber waits on a closing writer, then
    /// the writer, which snapshots whatever is still pending.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.broadcaster.shutdown().await;

        let result = self.writer.shutdown().await;
        self.failure_watch.abort();

        let saved = result.context("writer shutdown failed")?;
        if saved > 0 {
            info!(saved, "pending messages saved for the next start");
        }
        Ok(())
    }
}

async fn watch_flush_failures(writer: BufferedWriter) {
    let mut failures = writer.failures();
    loop {
        match failures.recv().await {
            Ok(exhausted) => {
                error!(
                    attempts = exhausted.attempts,
                    pending = exhausted.pending,
                    reason = %exhausted.reason,
                    "message flush gave up; messages stay queued until the next submission"
                );
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "missed flush failure notifications");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
