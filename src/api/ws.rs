//! WebSocket push of alert snapshots to subscribers.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use super::AppState;
use crate::models::Snapshot;

/// Server message sent to clients
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ServerMessage {
    /// Initial connection acknowledgment
    Connected { message: String },
    /// A published alert snapshot (also sent once on connect)
    Snapshot { snapshot: Snapshot },
}

/// WebSocket endpoint for alert snapshot updates
pub async fn ws_alerts(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshots_rx = state.engine.subscribe();

    let connected = ServerMessage::Connected {
        message: "Connected to alert updates.".to_string(),
    };
    if let Ok(json) = serde_json::to_string(&connected) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // New subscribers start from the latest published snapshot.
    let latest = ServerMessage::Snapshot {
        snapshot: state.engine.latest_snapshot().await,
    };
    if let Ok(json) = serde_json::to_string(&latest) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = snapshots_rx.recv() => {
                match result {
                    Ok(snapshot) => {
                        let msg = ServerMessage::Snapshot { snapshot };
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
            msg = receiver.next() => {
                match msg {
                    // Clients only listen; anything but close is ignored.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
