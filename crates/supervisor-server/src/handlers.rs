//! HTTP handlers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use supervisor_core::errors::SupervisorError;
use supervisor_core::ids::SessionId;
use supervisor_engine::AgentRuntime;

use crate::multiplexer;
use crate::router::{self, InvocationRequest, ResponseMode};
use crate::server::AppState;

/// A [`SupervisorError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SupervisorError);

impl From<SupervisorError> for ApiError {
    fn from(e: SupervisorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(self.0.to_body())).into_response()
    }
}

/// `POST /invocations`
#[instrument(skip_all)]
pub async fn invocations(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: InvocationRequest = serde_json::from_slice(&body).map_err(|e| {
        SupervisorError::Validation {
            message: "Request body must be a JSON object".into(),
            details: json!({ "field": "body", "error": e.to_string() }),
        }
    })?;
    let prompt = router::validate_prompt(request.prompt.as_deref())?.to_string();

    let session_id = router::resolve_session_id([
        router::header_value(&headers, &state.config.session_header),
        request.session_id.as_deref(),
    ]);
    let runtime = state
        .sessions
        .get_or_create(&session_id, request.actor_id.as_deref())?;

    let mode = router::negotiate(&headers, request.stream);
    info!(session_id = %session_id, ?mode, streaming = mode.is_streaming(), "invocation");

    Ok(match mode {
        ResponseMode::Batch => batch(&runtime, &prompt).await?,
        ResponseMode::Sse => {
            multiplexer::sse(runtime.run_streaming(prompt), state.config.sse_keep_alive)
        }
        ResponseMode::Ndjson => multiplexer::ndjson(runtime.run_streaming(prompt)),
    })
}

async fn batch(runtime: &Arc<AgentRuntime>, prompt: &str) -> Result<Response, ApiError> {
    let out = runtime.run(prompt).await?;
    Ok(Json(json!({
        "output": { "response": out.output },
        "session_id": runtime.session_id(),
        "timestamp": Utc::now(),
        "model": out.model,
    }))
    .into_response())
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "version": state.config.version,
    }))
}

/// `GET /ready`
pub async fn ready(State(state): State<AppState>) -> Response {
    if state.ready.load(Ordering::Acquire) {
        Json(json!({
            "status": "ready",
            "timestamp": Utc::now(),
            "version": state.config.version,
            "model": state.sessions.model(),
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "starting", "timestamp": Utc::now() })),
        )
            .into_response()
    }
}

/// `GET /debug/sessions`
pub async fn debug_sessions(State(state): State<AppState>) -> Response {
    Json(state.sessions.list_active()).into_response()
}

/// `DELETE /sessions/{id}`
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let session_id = SessionId::from_raw(id);
    let evicted = state.sessions.evict(&session_id);
    if !evicted {
        warn!(session_id = %session_id, "evict requested for unknown session");
    }
    Json(json!({ "evicted": evicted, "session_id": session_id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use supervisor_core::errors::GatewayError;
    use supervisor_core::turns::Role;
    use supervisor_engine::{SessionManager, SessionManagerConfig, ToolRegistry};
    use supervisor_llm::{MockProvider, MockResponse};
    use supervisor_settings::SessionMode;

    use crate::server::{build_router, ServerConfig};

    fn state_with(provider: Arc<MockProvider>, config: SessionManagerConfig) -> AppState {
        let sessions = SessionManager::new(provider, Arc::new(ToolRegistry::new()), config);
        let state = AppState::new(Arc::new(sessions), ServerConfig::default());
        state.ready.store(true, Ordering::Release);
        state
    }

    fn echo_state() -> (AppState, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::echo());
        (
            state_with(provider.clone(), SessionManagerConfig::default()),
            provider,
        )
    }

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::post("/invocations")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, String) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn send_json(state: &AppState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, text) = send(state, request).await;
        (status, serde_json::from_str(&text).unwrap())
    }

    #[tokio::test]
    async fn batch_invocation_generates_session() {
        let (state, _) = echo_state();
        let (status, body) = send_json(&state, post(json!({"prompt": "Hi"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"]["response"], "Echo: Hi");
        assert_eq!(body["model"], "mock-model");
        let session_id = body["session_id"].as_str().unwrap();
        assert!(!session_id.is_empty());
        assert!(body["timestamp"].is_string());

        // follow-up on the same session sees the earlier exchange
        let (_, body) = send_json(
            &state,
            post(json!({"prompt": "Again", "session_id": session_id})),
        )
        .await;
        assert_eq!(body["session_id"], session_id);
        let runtime = state.sessions.get(&SessionId::from_raw(session_id)).unwrap();
        let roles: Vec<Role> = runtime.snapshot().iter().map(|t| t.role()).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn runtime_header_wins_over_payload() {
        let (state, _) = echo_state();
        let request = Request::post("/invocations")
            .header("x-amzn-bedrock-agentcore-runtime-session-id", "H")
            .body(Body::from(json!({"prompt": "Hi", "session_id": "P"}).to_string()))
            .unwrap();
        let (_, body) = send_json(&state, request).await;
        assert_eq!(body["session_id"], "H");
        assert!(state.sessions.get(&SessionId::from_raw("P")).is_none());
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_before_backend() {
        let (state, provider) = echo_state();
        let (status, body) = send_json(&state, post(json!({"prompt": "   "}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "ValidationError");
        assert_eq!(body["error"]["message"], "Prompt is required and cannot be empty");
        assert_eq!(body["error"]["details"]["field"], "prompt");
        assert_eq!(provider.call_count(), 0);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_validation_error() {
        let (state, _) = echo_state();
        let request = Request::post("/invocations")
            .body(Body::from("not json"))
            .unwrap();
        let (status, body) = send_json(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["details"]["field"], "body");
    }

    #[tokio::test]
    async fn backend_failure_is_agent_error() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Error(
            GatewayError::ProviderOverloaded,
        )]));
        let state = state_with(provider, SessionManagerConfig::default());
        let (status, body) =
            send_json(&state, post(json!({"prompt": "Hi", "session_id": "s-1"}))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "AgentError");
        assert_eq!(body["error"]["message"], "Failed to process agent invocation");
        assert_eq!(body["error"]["details"]["session_id"], "s-1");
    }

    #[tokio::test]
    async fn missing_store_configuration_is_reported() {
        let config = SessionManagerConfig {
            mode: SessionMode::ExternalStore,
            ..SessionManagerConfig::default()
        };
        let state = state_with(Arc::new(MockProvider::echo()), config);
        let (status, body) = send_json(&state, post(json!({"prompt": "Hi"}))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["type"], "ConfigurationError");
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn ndjson_stream_ends_with_error_after_partials() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::chunks_then_error(
            &["a", "b"],
            GatewayError::StreamInterrupted("reset".into()),
        )]));
        let state = state_with(provider, SessionManagerConfig::default());
        let request = Request::post("/invocations")
            .header("accept", "application/x-ndjson")
            .body(Body::from(json!({"prompt": "Hi"}).to_string()))
            .unwrap();

        let (status, text) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        let kinds: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds.iter().filter(|k| *k == "partial_text").count(), 2);
        assert_eq!(kinds.iter().filter(|k| *k == "error").count(), 1);
        assert_eq!(kinds.last().unwrap(), "error");
    }

    #[tokio::test]
    async fn stream_flag_selects_sse() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::text_chunks(&["Hel", "lo"])]));
        let state = state_with(provider, SessionManagerConfig::default());

        let (status, text) = send(&state, post(json!({"prompt": "Hi", "stream": true}))).await;
        assert_eq!(status, StatusCode::OK);
        let events: Vec<serde_json::Value> = text
            .split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert_eq!(events[1]["data"], "Hel");
        assert_eq!(events[2]["data"], "lo");
        assert_eq!(events.last().unwrap()["result"], "Hello");
        assert!(events.iter().all(|e| e["model"] == "mock-model"));
    }

    #[tokio::test]
    async fn health_endpoints() {
        let (state, _) = echo_state();
        let (status, body) = send_json(&state, Request::get("/ping").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["version"].is_string());

        let (status, body) = send_json(&state, Request::get("/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        state.ready.store(false, Ordering::Release);
        let (status, _) = send(&state, Request::get("/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn debug_listing_and_eviction() {
        let (state, _) = echo_state();
        send(&state, post(json!({"prompt": "Hi", "session_id": "s-1"}))).await;

        let (_, body) = send_json(
            &state,
            Request::get("/debug/sessions").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["ids"][0], "s-1");

        let delete = || Request::delete("/sessions/s-1").body(Body::empty()).unwrap();
        let (_, body) = send_json(&state, delete()).await;
        assert_eq!(body["evicted"], true);
        let (_, body) = send_json(&state, delete()).await;
        assert_eq!(body["evicted"], false);
    }
}
