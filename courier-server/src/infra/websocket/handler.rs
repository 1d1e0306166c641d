use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::{Outbound, WsConnection};
use crate::infra::app_state::AppState;

/// How long a closing socket gets to flush its outbound queue.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Upgrade and register the socket as a broadcast subscriber.
pub async fn subscribe_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) =
        mpsc::channel::<Outbound>(state.config().broadcast.outbound_buffer);
    let closed = CancellationToken::new();

    let connection = Arc::new(WsConnection::new(tx, closed.clone()));
    let connection_id = connection.id;
    let subscription = state.broadcaster.subscribe(connection);
    let shutdown = state.broadcaster.shutdown_token();
    debug!(
        connection = %connection_id,
        subscriber = %subscription.id(),
        "websocket subscriber attached"
    );

    // Outgoing frames
    let outbound_closed = closed.clone();
    let mut outbound = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let sent = match frame {
                Outbound::Text(payload) => {
                    ws_sender.send(WsMessage::Text((&*payload).into())).await
                }
                Outbound::Ping => ws_sender.send(WsMessage::Ping(Bytes::new())).await,
                Outbound::Close => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            };
            if sent.is_err() {
                break;
            }
        }
        outbound_closed.cancel();
    });

    // Incoming frames: only pongs and closure matter.
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = shutdown.cancelled() => break,
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Pong(_))) => subscription.mark_alive(),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(connection = %connection_id, error = %err, "websocket read failed");
                    break;
                }
            },
        }
    }

    subscription.unsubscribe();
    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }
    debug!(connection = %connection_id, "websocket subscriber detached");
}
