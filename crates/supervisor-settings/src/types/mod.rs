//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs to name the values it changes.

mod model;
mod server;
mod session;

pub use model::*;
pub use server::*;
pub use session::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Version reported by the health endpoints.
    pub app_version: String,
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub session: SessionSettings,
    pub memory_store: MemoryStoreSettings,
    pub knowledge_base: KnowledgeBaseSettings,
    pub tools: ToolSettings,
    pub agent: AgentSettings,
    pub logging: LoggingSettings,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerSettings::default(),
            model: ModelSettings::default(),
            session: SessionSettings::default(),
            memory_store: MemoryStoreSettings::default(),
            knowledge_base: KnowledgeBaseSettings::default(),
            tools: ToolSettings::default(),
            agent: AgentSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl SupervisorSettings {
    /// Reject values no component can run with.
    ///
    /// A missing `memoryStore.memoryId` in `external_store` mode is not
    /// checked here; it surfaces when the first session is created.
    pub fn validate(&self) -> Result<()> {
        if self.session.conversation_window_size == 0 {
            return Err(SettingsError::InvalidValue(
                "session.conversationWindowSize must be at least 1".into(),
            ));
        }
        if self.knowledge_base.max_results == 0 {
            return Err(SettingsError::InvalidValue(
                "knowledgeBase.maxResults must be at least 1".into(),
            ));
        }
        if self.knowledge_base.max_results > HARD_MAX_RESULTS {
            return Err(SettingsError::InvalidValue(format!(
                "knowledgeBase.maxResults ({}) exceeds the limit of {HARD_MAX_RESULTS}",
                self.knowledge_base.max_results
            )));
        }
        if self.knowledge_base.default_results > self.knowledge_base.max_results {
            return Err(SettingsError::InvalidValue(format!(
                "knowledgeBase.defaultResults ({}) exceeds maxResults ({})",
                self.knowledge_base.default_results, self.knowledge_base.max_results
            )));
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(SettingsError::InvalidValue(format!(
                "model.temperature must be within 0.0..=1.0, got {}",
                self.model.temperature
            )));
        }
        if self.model.max_tokens == 0 {
            return Err(SettingsError::InvalidValue(
                "model.maxTokens must be at least 1".into(),
            ));
        }
        if self.server.stream_buffer_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.streamBufferSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
