//! Duplex WebSocket transport at `/ws`.
//!
//! Each inbound text message is an invocation request. Its events go back as
//! one text frame each, in order. Messages on one connection are handled one
//! at a time; a bad message, binary frames included, gets a single error
//! frame and the socket stays open.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use supervisor_core::errors::SupervisorError;
use supervisor_core::ids::SessionId;

use crate::multiplexer::encode_frame;
use crate::router::{self, InvocationRequest, FALLBACK_SESSION_HEADER};
use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOUND_BUFFER: usize = 64;

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let pinned = router::header_value(&headers, &state.config.session_header)
        .or_else(|| router::header_value(&headers, FALLBACK_SESSION_HEADER))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SessionId::from_raw);
    ws.on_upgrade(move |socket| handle_socket(socket, state, pinned))
}

/// Session binding for one connection.
struct ConnectionSessions {
    pinned: Option<SessionId>,
    generated: SessionId,
}

impl ConnectionSessions {
    /// The upgrade header wins for the whole connection, then the message's
    /// own id, then one id generated for the connection.
    fn resolve(&self, requested: Option<&str>) -> SessionId {
        if let Some(id) = &self.pinned {
            return id.clone();
        }
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => SessionId::from_raw(id),
            None => self.generated.clone(),
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, pinned: Option<SessionId>) {
    let sessions = ConnectionSessions {
        pinned,
        generated: SessionId::new(),
    };
    tracing::info!(session_id = ?sessions.pinned, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if !handle_message(&state, &sessions, text.as_str(), &tx).await {
                        break;
                    }
                }
                WsMessage::Binary(_) => {
                    let err = SupervisorError::validation(
                        "Messages must be sent as text frames",
                        "message",
                    );
                    if !send_error(&tx, &err).await {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
    tracing::info!("websocket disconnected");
}

/// Run one message to completion. Returns false once the writer is gone.
async fn handle_message(
    state: &AppState,
    sessions: &ConnectionSessions,
    text: &str,
    tx: &mpsc::Sender<String>,
) -> bool {
    let request: InvocationRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            let err = SupervisorError::Validation {
                message: "Message must be a JSON object".into(),
                details: serde_json::json!({ "field": "message", "error": e.to_string() }),
            };
            return send_error(tx, &err).await;
        }
    };
    let prompt = match router::validate_prompt(request.prompt.as_deref()) {
        Ok(prompt) => prompt.to_string(),
        Err(err) => return send_error(tx, &err).await,
    };

    let session_id = sessions.resolve(request.session_id.as_deref());
    let runtime = match state
        .sessions
        .get_or_create(&session_id, request.actor_id.as_deref())
    {
        Ok(runtime) => runtime,
        Err(err) => return send_error(tx, &err).await,
    };
    tracing::debug!(session_id = %session_id, "websocket invocation");

    let mut events = runtime.run_streaming(prompt);
    while let Some(event) = events.next().await {
        let frame = match encode_frame(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unencodable event");
                continue;
            }
        };
        if tx.send(frame).await.is_err() {
            return false;
        }
    }
    true
}

async fn send_error(tx: &mpsc::Sender<String>, err: &SupervisorError) -> bool {
    tx.send(err.to_body().to_string()).await.is_ok()
}
