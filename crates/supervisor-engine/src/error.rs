use supervisor_core::errors::{GatewayError, SupervisorError};
use supervisor_core::ids::SessionId;
use supervisor_core::tools::ToolError;
use supervisor_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("max tool rounds exceeded: {0}")]
    MaxToolRoundsExceeded(u32),

    #[error("client disconnected")]
    Disconnected,

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Map into the caller-facing taxonomy, attributing failures to `session_id`.
    pub fn into_supervisor(self, session_id: &SessionId) -> SupervisorError {
        match self {
            Self::Configuration(msg) => SupervisorError::Configuration(msg),
            other => SupervisorError::execution(Some(session_id.clone()), other),
        }
    }
}
