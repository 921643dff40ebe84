//! WebSocket transport: replayed bus events out, client requests in.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    handler::{RelayState, handle_message},
    protocol::{ClientMessage, ServerMessage},
};

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // A failed write ends the connection and, with it, the event subscription.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let events_tx = tx.clone();
    let mut events = state.bus.history_plus_stream();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if events_tx.send(ServerMessage::from(event)).is_err() {
                break;
            }
        }
    });

    tracing::debug!(subscribers = state.bus.subscriber_count(), "Event subscriber connected");

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        let reply = handle_message(&state, client_msg).await;
        if tx.send(reply).is_err() {
            break;
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::debug!("Event subscriber disconnected");
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(relay_state));
/// ```
#[must_use]
pub fn create_ws_router(state: RelayState) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}
