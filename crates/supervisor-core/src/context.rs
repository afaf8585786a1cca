use serde::{Deserialize, Serialize};

use crate::messages::Message;
use crate::tools::ToolDefinition;

/// The complete context sent to a backend for one call.
#[derive(Clone, Debug)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub system_blocks: Vec<SystemBlock>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    /// Create an empty context (useful for testing).
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            system_blocks: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn system_text(&self) -> String {
        self.system_blocks
            .iter()
            .map(|b| b.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A system prompt block with a cache classification.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemBlock {
    pub content: String,
    pub stability: Stability,
}

impl SystemBlock {
    pub fn stable(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stability: Stability::Stable,
        }
    }
}

/// Whether a block may be cached by backends that support prompt caching.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    Volatile,
}
