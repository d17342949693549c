use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use vis_ports::Clock;

use crate::application::permissions::PermissionGate;
use crate::application::registry::SignalRegistry;
use crate::application::subscriptions::SubscriptionManager;
use crate::error::VisError;

use super::message::VisResponse;
use super::session::ProtocolSession;

/// Shared state of every websocket connection
pub struct WsState {
    pub registry: Arc<SignalRegistry>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub gate: Arc<PermissionGate>,
    pub clock: Arc<dyn Clock>,
    /// Frames queued per connection before notifications are dropped
    pub outbound_capacity: usize,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for outgoing frames
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(state.outbound_capacity.max(1));

    // Spawn task to forward frames to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let (mut session, mut notifications) = ProtocolSession::open(Arc::clone(&state));
    let connection = session.connection();
    tracing::debug!(connection = %connection, "websocket connected");

    // Spawn task to forward subscription pushes
    let push_tx = tx.clone();
    let push_task = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            let frame = VisResponse::notification(notification);
            if let Ok(json) = serde_json::to_string(&frame) {
                if push_tx.send(json).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let response = match msg {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(_) => VisResponse::error(
                "",
                serde_json::Value::Null,
                &VisError::BadRequest("binary frames are not supported".into()),
                state.clock.now_millis(),
            ),
            Message::Close(_) => break,
            _ => continue,
        };

        if let Ok(json) = serde_json::to_string(&response) {
            if tx.send(json).await.is_err() {
                break;
            }
        }
    }

    // Cleanup: closing the session drops the notification sender, which ends
    // the push task.
    session.close();
    drop(session);
    let _ = push_task.await;
    drop(tx);
    let _ = send_task.await;
    tracing::debug!(connection = %connection, "websocket disconnected");
}
