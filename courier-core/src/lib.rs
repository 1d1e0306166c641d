//! # Courier Core
//!
//! Durable write batching with real-time fan-out.
//!
//! - [`writer`]: the [`BufferedWriter`](writer::BufferedWriter) that buffers
//!   incoming messages, flushes them to a [`MessageStore`](store::MessageStore)
//!   in batches, retries failed batches with linear backoff, and snapshots the
//!   pending queue across restarts.
//! - [`broadcast`]: the [`Broadcaster`](broadcast::Broadcaster) that pushes each
//!   persisted message to every live subscriber and reaps unresponsive ones.
//! - [`store`] and [`snapshot`]: the persistence ports and their bundled
//!   implementations.
//!
//! The two halves meet through [`BufferedWriter::on_persisted`](writer::BufferedWriter::on_persisted):
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{
//!     broadcast::{BroadcastConfig, Broadcaster},
//!     snapshot::FileSnapshotStore,
//!     store::MemoryMessageStore,
//!     writer::{BufferedWriter, WriterConfig},
//! };
//! use courier_model::Message;
//!
//! async fn wire() -> Result<(), Box<dyn std::error::Error>> {
//!     let writer = BufferedWriter::start(
//!         WriterConfig::default(),
//!         Arc::new(MemoryMessageStore::new()),
//!         Arc::new(FileSnapshotStore::new("data/pending-messages.json")),
//!     )
//!     .await?;
//!     let broadcaster = Broadcaster::new(BroadcastConfig::default());
//!     broadcaster.start();
//!
//!     let fanout = broadcaster.clone();
//!     writer.on_persisted(move |message| {
//!         fanout.broadcast(message);
//!     });
//!
//!     writer.submit(Message::new("hello"))?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Subscriber fan-out and liveness reaping
pub mod broadcast;

/// Error types shared by the writer, stores, and snapshots
pub mod error;

/// Recovery snapshot storage
pub mod snapshot;

/// Message store port and implementations
pub mod store;

/// Buffered batch writer
pub mod writer;

pub use courier_model as model;
pub use error::{FlushExhausted, SnapshotError, StoreError, WriterError};

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
