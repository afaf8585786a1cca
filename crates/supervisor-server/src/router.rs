//! Request routing decisions: which session, whether the prompt is usable,
//! and how the response is delivered.

use axum::http::header::ACCEPT;
use axum::http::HeaderMap;
use serde::Deserialize;

use supervisor_core::errors::SupervisorError;
use supervisor_core::ids::SessionId;

/// Secondary session header accepted on WebSocket upgrades.
pub const FALLBACK_SESSION_HEADER: &str = "x-session-id";

/// Body of `POST /invocations` and of each inbound WebSocket message.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseMode {
    Batch,
    Sse,
    Ndjson,
}

impl ResponseMode {
    pub fn is_streaming(&self) -> bool {
        !matches!(self, Self::Batch)
    }
}

/// First candidate that is non-empty after trimming, else a fresh id.
pub fn resolve_session_id<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> SessionId {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(SessionId::from_raw)
        .unwrap_or_default()
}

/// Reject missing or blank prompts before anything reaches the backend.
pub fn validate_prompt(prompt: Option<&str>) -> Result<&str, SupervisorError> {
    match prompt {
        Some(p) if !p.trim().is_empty() => Ok(p),
        _ => Err(SupervisorError::validation(
            "Prompt is required and cannot be empty",
            "prompt",
        )),
    }
}

/// Pick the delivery mode from `Accept` and the payload's `stream` flag.
pub fn negotiate(headers: &HeaderMap, stream_flag: Option<bool>) -> ResponseMode {
    let accept = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",")
        .to_ascii_lowercase();

    if accept.contains("text/event-stream") {
        ResponseMode::Sse
    } else if accept.contains("application/x-ndjson") || accept.contains("application/jsonl") {
        ResponseMode::Ndjson
    } else if stream_flag == Some(true) {
        ResponseMode::Sse
    } else {
        ResponseMode::Batch
    }
}

/// Session header value, if present and valid UTF-8.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
