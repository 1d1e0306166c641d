//! Persistent store port for messages plus the bundled implementations.

use async_trait::async_trait;
use courier_model::{Message, MessageId};

use crate::error::StoreError;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryMessageStore;
#[cfg(feature = "database")]
pub use postgres::PostgresMessageStore;

/// Append-only collection of persisted messages.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Persist `messages` in order and return the identifier assigned to each,
    /// position for position.
    async fn bulk_insert(
        &self,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, StoreError>;

    /// Every persisted message, oldest first.
    async fn list_all(&self) -> Result<Vec<Message>, StoreError>;

    /// Release the backend connection. Later calls fail with
    /// [`StoreError::Closed`].
    async fn close(&self);
}
