//! Backend model and agent prompt settings.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Anthropic,
    /// Scripted offline backend.
    Mock,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub provider: ModelProvider,
    pub model_id: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Anthropic,
            model_id: "claude-3-5-haiku-20241022".to_string(),
            temperature: 0.1,
            max_tokens: 512,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub system_prompt: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a concise AI assistant. Answer directly and briefly."
                .to_string(),
        }
    }
}
