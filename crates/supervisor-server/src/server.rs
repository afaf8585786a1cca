use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use supervisor_engine::SessionManager;
use supervisor_settings::SupervisorSettings;

use crate::{handlers, ws};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Header carrying the runtime-assigned session id.
    pub session_header: String,
    pub sse_keep_alive: Duration,
    /// Evict sessions idle this long. Off when `None`.
    pub idle_ttl: Option<Duration>,
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            session_header: "x-amzn-bedrock-agentcore-runtime-session-id".into(),
            sse_keep_alive: Duration::from_secs(15),
            idle_ttl: None,
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            session_header: settings.server.session_header.to_ascii_lowercase(),
            sse_keep_alive: Duration::from_secs(settings.server.sse_keep_alive_secs),
            idle_ttl: settings.session.idle_ttl_secs.map(Duration::from_secs),
            version: settings.app_version.clone(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub config: Arc<ServerConfig>,
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionManager>, config: ServerConfig) -> Self {
        Self {
            sessions,
            config: Arc::new(config),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/invocations", post(handlers::invocations))
        .route("/ws", get(ws::ws_handler))
        .route("/ping", get(handlers::ping))
        .route("/ready", get(handlers::ready))
        .route("/debug/sessions", get(handlers::debug_sessions))
        .route("/sessions/{id}", delete(handlers::delete_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, mark ready and serve in the background.
pub async fn start(
    config: ServerConfig,
    sessions: Arc<SessionManager>,
) -> Result<ServerHandle, std::io::Error> {
    let addr = format!("{}:{}", config.host, config.port);
    let idle_ttl = config.idle_ttl;
    let state = AppState::new(Arc::clone(&sessions), config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let router = build_router(state.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "server stopped with error");
        }
    });

    let eviction = idle_ttl.map(|ttl| start_eviction_task(Arc::clone(&sessions), ttl));

    state.ready.store(true, Ordering::Release);
    tracing::info!(addr = %local_addr, model = %sessions.model(), "supervisor listening");

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        state,
        shutdown,
        server,
        _eviction: eviction,
    })
}

/// Evict idle sessions on a fixed cadence.
pub fn start_eviction_task(sessions: Arc<SessionManager>, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            sessions.evict_idle(ttl);
        }
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    pub state: AppState,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    _eviction: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.state.ready.store(false, Ordering::Release);
        self.shutdown.cancel();
        if let Some(eviction) = &self._eviction {
            eviction.abort();
        }
        let _ = self.server.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use supervisor_engine::{SessionManagerConfig, ToolRegistry};
    use supervisor_llm::{MockProvider, MockResponse};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn sessions(provider: MockProvider) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::new(provider),
            Arc::new(ToolRegistry::new()),
            SessionManagerConfig::default(),
        ))
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_invocations() {
        let handle = start(test_config(), sessions(MockProvider::echo()))
            .await
            .unwrap();
        assert!(handle.port > 0);
        let base = format!("http://127.0.0.1:{}", handle.port);

        let resp = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(resp.status(), 200);

        let resp = reqwest::Client::new()
            .post(format!("{base}/invocations"))
            .json(&serde_json::json!({"prompt": "Hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["output"]["response"], "Echo: Hi");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn streamed_sse_over_tcp() {
        let handle = start(
            test_config(),
            sessions(MockProvider::new(vec![MockResponse::text_chunks(&["a", "b", "c"])])),
        )
        .await
        .unwrap();

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/invocations", handle.port))
            .header("accept", "text/event-stream")
            .json(&serde_json::json!({"prompt": "Hi", "session_id": "sse-1"}))
            .send()
            .await
            .unwrap();
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        let text = resp.text().await.unwrap();
        let partials = text.matches(r#""kind":"partial_text""#).count();
        assert_eq!(partials, 3);
        assert!(text.contains(r#""result":"abc""#));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn websocket_duplex_survives_malformed_messages() {
        let handle = start(test_config(), sessions(MockProvider::echo()))
            .await
            .unwrap();
        let url = format!("ws://127.0.0.1:{}/ws", handle.port);
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        async fn next_json(
            socket: &mut (impl futures::Stream<
                Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
            > + Unpin),
        ) -> serde_json::Value {
            loop {
                match socket.next().await.unwrap().unwrap() {
                    WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                    _ => continue,
                }
            }
        }

        async fn until_result(
            socket: &mut (impl futures::Stream<
                Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>,
            > + Unpin),
        ) -> Vec<serde_json::Value> {
            let mut frames = Vec::new();
            loop {
                let frame = next_json(socket).await;
                let done = frame["kind"] == "result" || frame["kind"] == "error";
                frames.push(frame);
                if done {
                    return frames;
                }
            }
        }

        socket
            .send(WsMessage::Text(
                serde_json::json!({"prompt": "one", "session_id": "ws-1"}).to_string().into(),
            ))
            .await
            .unwrap();
        let frames = until_result(&mut socket).await;
        assert_eq!(frames.last().unwrap()["result"], "Echo: one");
        assert!(frames.iter().all(|f| f["session_id"] == "ws-1"));

        socket.send(WsMessage::Text("not json".into())).await.unwrap();
        let error = next_json(&mut socket).await;
        assert_eq!(error["error"]["type"], "ValidationError");

        let binary = serde_json::json!({"prompt": "bin", "session_id": "ws-1"}).to_string();
        socket
            .send(WsMessage::Binary(binary.into_bytes().into()))
            .await
            .unwrap();
        let error = next_json(&mut socket).await;
        assert_eq!(error["error"]["type"], "ValidationError");
        assert_eq!(error["error"]["details"]["field"], "message");

        socket
            .send(WsMessage::Text(
                serde_json::json!({"prompt": "two", "session_id": "ws-1"}).to_string().into(),
            ))
            .await
            .unwrap();
        let frames = until_result(&mut socket).await;
        assert_eq!(frames.last().unwrap()["result"], "Echo: two");

        let runtime = handle
            .state
            .sessions
            .get(&supervisor_core::ids::SessionId::from_raw("ws-1"))
            .unwrap();
        assert_eq!(runtime.snapshot().len(), 4);

        socket.close(None).await.unwrap();
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_task_removes_idle_sessions() {
        let sessions = sessions(MockProvider::echo());
        sessions
            .get_or_create(&supervisor_core::ids::SessionId::from_raw("idle"), None)
            .unwrap();

        let task = start_eviction_task(Arc::clone(&sessions), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(sessions.is_empty());
        task.abort();
    }
}
