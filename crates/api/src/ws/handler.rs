use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use kiln_core::types::DbId;
use kiln_engine::events::MSG_TYPE_PROGRESS_UPDATE;

use crate::state::AppState;
use crate::stats;

/// Inbound client requests. Anything else on the socket is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Ask for the current progress of one job.
    GetJobProgress { job_id: DbId },
    /// Ask for the live queue statistics snapshot.
    RequestQueueStatus,
}

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsHub` and
/// managed by two tasks (sender + receiver).
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsHub`.
///   2. Spawns a sender task that forwards messages from the hub channel.
///   3. Dispatches inbound requests on the current task.
///   4. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    // Register and get the receiver for outbound messages.
    let mut rx = state.hub.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: dispatch inbound requests.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Text(text)) => {
                dispatch_client_message(&state, &conn_id, &text).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: remove connection and abort sender task.
    state.hub.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Answer one inbound request on the connection it arrived on.
async fn dispatch_client_message(state: &AppState, conn_id: &str, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "Unparseable client message");
            let payload = json!({
                "type": "error",
                "error": "unrecognized message",
            });
            reply(state, conn_id, payload).await;
            return;
        }
    };

    match message {
        ClientMessage::GetJobProgress { job_id } => {
            let payload = match state.monitor.get_progress(job_id).await {
                Some(update) => {
                    let mut value = serde_json::to_value(&update).unwrap_or_default();
                    if let Some(map) = value.as_object_mut() {
                        map.insert("type".into(), MSG_TYPE_PROGRESS_UPDATE.into());
                    }
                    value
                }
                None => json!({
                    "type": "error",
                    "error": format!("unknown job {job_id}"),
                }),
            };
            reply(state, conn_id, payload).await;
        }
        ClientMessage::RequestQueueStatus => {
            let payload = stats::queue_statistics(state).await;
            reply(state, conn_id, payload).await;
        }
    }
}

async fn reply(state: &AppState, conn_id: &str, payload: serde_json::Value) {
    state
        .hub
        .send_to(conn_id, Message::Text(payload.to_string().into()))
        .await;
}
