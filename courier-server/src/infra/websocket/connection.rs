use std::{fmt, sync::Arc};

use courier_core::broadcast::{SendError, SubscriberConnection};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Frame queued for a socket's outbound task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close,
}

/// Broadcaster-facing half of one WebSocket. Frames go through a bounded
/// channel so the broadcaster never waits on a slow peer.
pub struct WsConnection {
    pub id: Uuid,
    sender: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("id", &self.id)
            .field("channel_closed", &self.sender.is_closed())
            .field("capacity", &self.sender.capacity())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl WsConnection {
    pub fn new(sender: mpsc::Sender<Outbound>, closed: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
            closed,
        }
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), SendError> {
        if self.closed.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.sender.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

impl SubscriberConnection for WsConnection {
    fn send(&self, payload: Arc<str>) -> Result<(), SendError> {
        self.enqueue(Outbound::Text(payload))
    }

    fn ping(&self) -> Result<(), SendError> {
        self.enqueue(Outbound::Ping)
    }

    fn close(&self) {
        // Best effort; a full buffer still ends the socket through the token.
        let _ = self.sender.try_send(Outbound::Close);
        self.closed.cancel();
    }
}
