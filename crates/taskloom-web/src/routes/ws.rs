//! WebSocket endpoint streaming published context documents.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use taskloom_core::enrich::ContextDocument;
use tokio::sync::broadcast;
use tracing::debug;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut contexts = state.engine.subscribe();

    // Send the current context on connect, then stream updates.
    if let Some(document) = state.engine.get_context() {
        if send_context(&mut socket, &document).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            published = contexts.recv() => {
                match published {
                    Ok(document) => {
                        if send_context(&mut socket, &document).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "context subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

async fn send_context(
    socket: &mut WebSocket,
    document: &ContextDocument,
) -> Result<(), axum::Error> {
    match serde_json::to_string(document) {
        Ok(payload) => socket.send(Message::Text(payload)).await,
        Err(_) => Ok(()),
    }
}
