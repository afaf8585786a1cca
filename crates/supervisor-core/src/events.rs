//! Client-facing stream events and the normalization from backend events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{GatewayError, SupervisorError};
use crate::ids::SessionId;
use crate::messages::StopReason;
use crate::stream::BackendEvent;

/// One unit of streamed output, as delivered to clients.
///
/// Serialized as a single flat object: the envelope fields plus a `kind`
/// tag and the payload's own key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    PartialText { data: String },
    ToolStart { tool: ToolInfo },
    Lifecycle { lifecycle: String },
    Result { result: String },
    Error { error: ErrorInfo },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl From<&SupervisorError> for ErrorInfo {
    fn from(e: &SupervisorError) -> Self {
        Self {
            kind: e.type_name().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<&GatewayError> for ErrorInfo {
    fn from(e: &GatewayError) -> Self {
        Self {
            kind: "AgentError".to_string(),
            message: e.to_string(),
        }
    }
}

impl EventPayload {
    pub fn lifecycle(marker: impl Into<String>) -> Self {
        Self::Lifecycle {
            lifecycle: marker.into(),
        }
    }

    pub fn error(info: impl Into<ErrorInfo>) -> Self {
        Self::Error { error: info.into() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl StreamEvent {
    pub fn new(session_id: SessionId, model: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            model: model.into(),
            payload,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }

    pub fn is_error(&self) -> bool {
        self.payload.is_error()
    }
}

/// Map a backend event to a client payload, or `None` when the event is
/// not forwarded.
///
/// A `Done` that stopped for tool use is not a final result; the caller
/// runs the tools and calls the backend again.
pub fn normalize(event: &BackendEvent) -> Option<EventPayload> {
    match event {
        BackendEvent::Start => Some(EventPayload::lifecycle("message_start")),
        BackendEvent::TextDelta { delta } => Some(EventPayload::PartialText {
            data: delta.clone(),
        }),
        BackendEvent::ToolCallStart { name, .. } => Some(EventPayload::ToolStart {
            tool: ToolInfo { name: name.clone() },
        }),
        BackendEvent::Done {
            message,
            stop_reason,
        } if *stop_reason != StopReason::ToolUse => Some(EventPayload::Result {
            result: message.text_content(),
        }),
        BackendEvent::Error { error } => Some(EventPayload::error(error)),
        _ => None,
    }
}
