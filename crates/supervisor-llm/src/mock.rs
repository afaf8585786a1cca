use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use supervisor_core::context::LlmContext;
use supervisor_core::errors::GatewayError;
use supervisor_core::ids::ToolCallId;
use supervisor_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock,
};
use supervisor_core::provider::{BackendStream, GenerationOptions, LlmProvider};
use supervisor_core::stream::BackendEvent;

/// Pre-programmed responses for deterministic runs without API calls.
#[derive(Clone)]
pub enum MockResponse {
    /// Yield a sequence of events.
    Stream(Vec<BackendEvent>),
    /// Yield a sequence of events, sleeping before each one.
    Paced(Duration, Vec<BackendEvent>),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// A complete text reply delivered as a single delta.
    pub fn stream_text(text: &str) -> Self {
        Self::text_chunks(&[text])
    }

    /// A complete text reply delivered as one delta per chunk.
    pub fn text_chunks(chunks: &[&str]) -> Self {
        let full: String = chunks.concat();
        let mut events = vec![BackendEvent::Start, BackendEvent::TextStart];
        events.extend(chunks.iter().map(|c| BackendEvent::TextDelta {
            delta: (*c).to_string(),
        }));
        events.push(BackendEvent::TextEnd { text: full.clone() });
        events.push(BackendEvent::Done {
            message: AssistantMessage::text(full),
            stop_reason: StopReason::EndTurn,
        });
        Self::Stream(events)
    }

    /// Text deltas followed by a mid-stream error.
    pub fn chunks_then_error(chunks: &[&str], error: GatewayError) -> Self {
        let mut events = vec![BackendEvent::Start, BackendEvent::TextStart];
        events.extend(chunks.iter().map(|c| BackendEvent::TextDelta {
            delta: (*c).to_string(),
        }));
        events.push(BackendEvent::Error { error });
        Self::Stream(events)
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![BackendEvent::Start, BackendEvent::Error { error }])
    }

    /// A reply that stops to call one tool.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        let tool_call = ToolCallBlock {
            id: ToolCallId::new(),
            name: name.to_string(),
            arguments,
        };
        Self::Stream(vec![
            BackendEvent::Start,
            BackendEvent::ToolCallStart {
                tool_call_id: tool_call.id.clone(),
                name: tool_call.name.clone(),
            },
            BackendEvent::ToolCallEnd {
                tool_call: tool_call.clone(),
            },
            BackendEvent::Done {
                message: AssistantMessage {
                    content: vec![AssistantContent::ToolCall(tool_call)],
                    usage: None,
                    stop_reason: Some(StopReason::ToolUse),
                },
                stop_reason: StopReason::ToolUse,
            },
        ])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
///
/// Once the script is exhausted it either errors or, when built with
/// [`MockProvider::echo`], replies with the last user message.
pub struct MockProvider {
    model: String,
    responses: Vec<MockResponse>,
    echo_when_exhausted: bool,
    call_count: AtomicUsize,
    contexts: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            model: "mock-model".to_string(),
            responses,
            echo_when_exhausted: false,
            call_count: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// An unscripted provider that echoes every prompt back.
    pub fn echo() -> Self {
        Self {
            echo_when_exhausted: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Messages sent on each call, in call order.
    pub fn received_messages(&self) -> Vec<Vec<Message>> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &GenerationOptions,
    ) -> Result<BackendStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context.messages.clone());

        match self.responses.get(idx) {
            Some(response) => resolve_response(response.clone()).await,
            None if self.echo_when_exhausted => {
                let last_user = context
                    .messages
                    .iter()
                    .rev()
                    .find_map(|m| match m {
                        Message::User(u) => Some(u.text.as_str()),
                        _ => None,
                    })
                    .unwrap_or_default();
                resolve_response(MockResponse::stream_text(&format!("Echo: {last_user}"))).await
            }
            None => Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))),
        }
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
async fn resolve_response(response: MockResponse) -> Result<BackendStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Paced(interval, events) => {
                let paced = stream::iter(events).then(move |event| async move {
                    tokio::time::sleep(interval).await;
                    event
                });
                return Ok(Box::pin(paced));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
