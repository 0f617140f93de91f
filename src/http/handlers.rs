use super::state::AppState;
use crate::session::TransportKind;
use crate::transport::{BridgeMessage, CallerMessage, TransportEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Caller's inbound identifier, used when `start` carries no hint
    pub caller: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /media-stream
/// Telephony caller stream
pub async fn media_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, TransportKind::Telephony, params.caller)
    })
}

/// GET /test-agent
/// Browser test harness stream
pub async fn test_agent(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, TransportKind::BrowserTest, params.caller)
    })
}

/// GET /sessions
/// Live session summaries
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.snapshot().await)
}

/// GET /sessions/:session_id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(status) => (StatusCode::OK, Json(status.borrow().clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Bridge one upgraded socket to a session until it closes
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    transport: TransportKind,
    caller_ref: Option<String>,
) {
    let run = state.manager.open(transport);
    let session_id = run.id();
    state.sessions.write().await.insert(session_id, run.status());

    let capacity = run.settings().outbound_capacity.max(1);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<BridgeMessage>(capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(capacity);

    let (mut sender, mut receiver) = socket.split();

    // Writer: drains the session's outbound queue onto the socket
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Reader: parses caller frames for the ingress task
    let reader = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            let event = match frame {
                Ok(Message::Text(text)) => match CallerMessage::parse(&text) {
                    Ok(message) => TransportEvent::Message(message),
                    Err(_) => TransportEvent::Invalid(text),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Caller socket error: {}", e);
                    break;
                }
            };
            if inbound_tx.send(event).await.is_err() {
                return;
            }
        }
        let _ = inbound_tx.send(TransportEvent::Disconnected).await;
    });

    let record = run.run(caller_ref, inbound_rx, outbound_tx).await;

    reader.abort();
    if let Err(e) = writer.await {
        warn!("Socket writer task failed: {}", e);
    }

    state.sessions.write().await.remove(&session_id);

    info!(
        "Session {} finished after {:.1}s ({:?})",
        session_id, record.duration_seconds, record.end_reason
    );
}
