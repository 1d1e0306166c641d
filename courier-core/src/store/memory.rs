use async_trait::async_trait;
use courier_model::{Message, MessageId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::MessageStore;
use crate::error::StoreError;

/// Process-local store. Nothing survives a restart; intended for tests and
/// `memory://` development setups.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
    closed: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn bulk_insert(
        &self,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }

        let mut guard = self.messages.write();
        let ids: Vec<MessageId> =
            messages.iter().map(|_| MessageId::new()).collect();
        guard.extend(
            messages
                .iter()
                .cloned()
                .zip(ids.iter().copied())
                .map(|(message, id)| message.with_id(id)),
        );
        Ok(ids)
    }

    async fn list_all(&self) -> Result<Vec<Message>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let mut messages = self.messages.read().clone();
        messages.sort_by(|a, b| {
            a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
        });
        Ok(messages)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
