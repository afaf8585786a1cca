//! Session, history store, knowledge base and tool settings.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// History lives only in the runtime's window.
    #[default]
    InMemory,
    /// History is also persisted to, and replayed from, a history store.
    ExternalStore,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub mode: SessionMode,
    /// Maximum turns kept per session.
    pub conversation_window_size: usize,
    /// Backend calls allowed per turn when tools are in play.
    pub max_tool_rounds: u32,
    /// Evict sessions idle longer than this. Off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ttl_secs: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mode: SessionMode::InMemory,
            conversation_window_size: 20,
            max_tool_rounds: 8,
            idle_ttl_secs: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryStoreSettings {
    /// Identifies the memory namespace. Required in `external_store` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    /// SQLite database path.
    pub path: String,
    /// Actor used when a request carries none.
    pub default_actor_id: String,
}

impl Default for MemoryStoreSettings {
    fn default() -> Self {
        Self {
            memory_id: None,
            path: "supervisor-memory.db".to_string(),
            default_actor_id: "default_user".to_string(),
        }
    }
}

/// Upper bound on retrieval results, whatever the settings say.
pub const HARD_MAX_RESULTS: u32 = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeBaseSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
    /// Results returned when the caller does not ask for a count.
    pub default_results: u32,
    /// Cap on requested results. At most [`HARD_MAX_RESULTS`].
    pub max_results: u32,
    /// Snippets scoring below this are dropped.
    pub min_score: f64,
    /// Retrieval service URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for KnowledgeBaseSettings {
    fn default() -> Self {
        Self {
            knowledge_base_id: None,
            default_results: 3,
            max_results: 5,
            min_score: 0.4,
            endpoint: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    /// Built-in tools to expose, by name.
    pub enabled: Vec<String>,
    /// Tool output larger than this is truncated before entering history.
    pub max_output_bytes: usize,
    pub http_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            max_output_bytes: 16_384,
            http_timeout_secs: 30,
        }
    }
}
