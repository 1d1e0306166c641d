use std::{fmt, sync::Arc};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("connection outbound buffer full")]
    Full,
}

/// Transport-side handle for one subscriber.
///
/// Implementations hand frames to the transport without waiting on it, so
/// the broadcaster can be driven from the writer's persisted-handler path.
pub trait SubscriberConnection: Send + Sync + fmt::Debug {
    /// Queue a serialized message.
    fn send(&self, payload: Arc<str>) -> Result<(), SendError>;

    /// Queue a liveness probe. The transport reports the answer through
    /// [`Subscription::mark_alive`](super::Subscription::mark_alive).
    fn ping(&self) -> Result<(), SendError>;

    /// Ask the transport to close the connection.
    fn close(&self);
}
