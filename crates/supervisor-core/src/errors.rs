use std::time::Duration;

use serde_json::json;

use crate::ids::SessionId;

/// Typed error hierarchy for backend (LLM gateway) operations.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Transient
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    // Operational
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

/// The three failure kinds surfaced to callers of the orchestration layer.
///
/// `Validation` is raised before any backend call and is user-correctable.
/// `Execution` wraps backend, tool or store failures with the session they
/// occurred in. `Configuration` aborts session creation and leaves no
/// partial state behind.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{message}")]
    Validation {
        message: String,
        details: serde_json::Value,
    },

    #[error("{message}: {cause}")]
    Execution {
        message: String,
        session_id: Option<SessionId>,
        cause: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SupervisorError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        Self::Validation {
            message: message.into(),
            details: json!({ "field": field }),
        }
    }

    pub fn execution(session_id: Option<SessionId>, cause: impl std::fmt::Display) -> Self {
        Self::Execution {
            message: "Failed to process agent invocation".into(),
            session_id,
            cause: cause.to_string(),
        }
    }

    /// Wire name of the error kind, as used in error response bodies.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Execution { .. } => "AgentError",
            Self::Configuration(_) => "ConfigurationError",
        }
    }

    /// The top-level message, without the wrapped cause.
    pub fn message(&self) -> String {
        match self {
            Self::Validation { message, .. } | Self::Execution { message, .. } => message.clone(),
            Self::Configuration(msg) => msg.clone(),
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::Validation { details, .. } => details.clone(),
            Self::Execution {
                session_id, cause, ..
            } => json!({ "error": cause, "session_id": session_id }),
            Self::Configuration(_) => json!({}),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// `{"error": {"type", "message", "details"}}` body shared by every transport.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "error": {
                "type": self.type_name(),
                "message": self.message(),
                "details": self.details(),
            }
        })
    }
}
