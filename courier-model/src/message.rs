use chrono::{DateTime, Utc};

use crate::{
    error::{ModelError, Result},
    ids::MessageId,
};

/// A unit of content accepted from a producer.
///
/// `id` stays `None` until the store persists the message; the persisted copy
/// is produced with [`Message::with_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub id: Option<MessageId>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Stamp `content` with the current time.
    pub fn new(content: impl Into<String>) -> Self {
        Self::at(content, Utc::now())
    }

    pub fn at(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            content: content.into(),
            timestamp,
        }
    }

    pub fn with_id(self, id: MessageId) -> Self {
        Self {
            id: Some(id),
            ..self
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Reject blank content and content longer than `max_len` characters.
    pub fn validate(&self, max_len: usize) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(ModelError::EmptyContent);
        }
        let len = self.content.chars().count();
        if len > max_len {
            return Err(ModelError::ContentTooLong { len, max: max_len });
        }
        Ok(())
    }
}
