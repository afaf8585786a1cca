//! Server and logging settings.

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// Header carrying the runtime-assigned session id. Matched
    /// case-insensitively.
    pub session_header: String,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive_secs: u64,
    /// Capacity of the per-turn event channel.
    pub stream_buffer_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            session_header: "x-amzn-bedrock-agentcore-runtime-session-id".to_string(),
            sse_keep_alive_secs: 15,
            stream_buffer_size: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Per-target overrides, e.g. `{"supervisor_llm": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            modules: std::collections::BTreeMap::new(),
        }
    }
}
