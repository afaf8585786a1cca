use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::context::LlmContext;
use crate::errors::GatewayError;
use crate::messages::AssistantMessage;
use crate::stream::BackendEvent;

pub type BackendStream = Pin<Box<dyn Stream<Item = BackendEvent> + Send>>;

/// Options controlling generation behavior.
#[derive(Clone, Debug, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
}

/// A language-model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        context: &LlmContext,
        options: &GenerationOptions,
    ) -> Result<BackendStream, GatewayError>;

    /// Drive `stream` to completion and return the final assistant message.
    async fn generate(
        &self,
        context: &LlmContext,
        options: &GenerationOptions,
    ) -> Result<AssistantMessage, GatewayError> {
        let mut stream = self.stream(context, options).await?;
        while let Some(event) = stream.next().await {
            match event {
                BackendEvent::Done { message, .. } => return Ok(message),
                BackendEvent::Error { error } => return Err(error),
                _ => {}
            }
        }
        Err(GatewayError::StreamInterrupted(
            "stream ended without a final message".into(),
        ))
    }
}
