use serde::Deserialize;
use serde_json::Value;

use supervisor_core::errors::GatewayError;
use supervisor_core::ids::ToolCallId;
use supervisor_core::messages::{
    AssistantContent, AssistantMessage, StopReason, TokenUsage, ToolCallBlock,
};
use supervisor_core::stream::BackendEvent;

/// State machine for parsing Anthropic Messages API SSE events.
#[derive(Default)]
pub struct SseParser {
    blocks: Vec<Block>,
    current: Option<usize>,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<StopReason>,
}

enum Block {
    Text(String),
    Thinking,
    ToolUse {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one SSE event and return zero or more backend events.
    pub fn parse_event(&mut self, event_type: &str, data: &str) -> Vec<BackendEvent> {
        let mut events = Vec::new();

        match event_type {
            "message_start" => {
                if let Ok(msg) = serde_json::from_str::<MessageStartEvent>(data) {
                    if let Some(usage) = msg.message.usage {
                        self.input_tokens = usage.input_tokens.unwrap_or(0);
                    }
                }
                events.push(BackendEvent::Start);
            }

            "content_block_start" => {
                if let Ok(start) = serde_json::from_str::<ContentBlockStartEvent>(data) {
                    let block = &start.content_block;
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            self.push_block(Block::Text(String::new()));
                            events.push(BackendEvent::TextStart);
                        }
                        Some("thinking") => self.push_block(Block::Thinking),
                        Some("tool_use") => {
                            let id = str_field(block, "id");
                            let name = str_field(block, "name");
                            events.push(BackendEvent::ToolCallStart {
                                tool_call_id: ToolCallId::from_raw(&id),
                                name: name.clone(),
                            });
                            self.push_block(Block::ToolUse {
                                id,
                                name,
                                arguments_json: String::new(),
                            });
                        }
                        _ => self.current = None,
                    }
                }
            }

            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_str::<ContentBlockDeltaEvent>(data) {
                    let current = self.current.and_then(|i| self.blocks.get_mut(i));
                    match (delta.delta.get("type").and_then(Value::as_str), current) {
                        (Some("text_delta"), Some(Block::Text(text))) => {
                            let chunk = str_field(&delta.delta, "text");
                            text.push_str(&chunk);
                            events.push(BackendEvent::TextDelta { delta: chunk });
                        }
                        (Some("thinking_delta"), Some(Block::Thinking)) => {
                            events.push(BackendEvent::ThinkingDelta {
                                delta: str_field(&delta.delta, "thinking"),
                            });
                        }
                        (
                            Some("input_json_delta"),
                            Some(Block::ToolUse {
                                id, arguments_json, ..
                            }),
                        ) => {
                            let partial = str_field(&delta.delta, "partial_json");
                            arguments_json.push_str(&partial);
                            events.push(BackendEvent::ToolCallDelta {
                                tool_call_id: ToolCallId::from_raw(id.as_str()),
                                arguments_delta: partial,
                            });
                        }
                        _ => {}
                    }
                }
            }

            "content_block_stop" => {
                match self.current.and_then(|i| self.blocks.get(i)) {
                    Some(Block::Text(text)) => {
                        events.push(BackendEvent::TextEnd { text: text.clone() });
                    }
                    Some(block @ Block::ToolUse { .. }) => {
                        if let Some(tool_call) = tool_call_from(block) {
                            events.push(BackendEvent::ToolCallEnd { tool_call });
                        }
                    }
                    _ => {}
                }
                self.current = None;
            }

            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<MessageDeltaEvent>(data) {
                    if let Some(usage) = delta.usage {
                        self.output_tokens = usage.output_tokens.unwrap_or(0);
                    }
                    self.stop_reason = delta
                        .delta
                        .and_then(|d| d.stop_reason)
                        .and_then(|r| parse_stop_reason(&r));
                }
            }

            "message_stop" => {
                let message = self.build_assistant_message();
                let stop_reason = message.stop_reason.unwrap_or(StopReason::EndTurn);
                events.push(BackendEvent::Done {
                    message,
                    stop_reason,
                });
            }

            "error" => {
                if let Ok(err) = serde_json::from_str::<ErrorEvent>(data) {
                    events.push(BackendEvent::Error {
                        error: classify_error(&err),
                    });
                }
            }

            _ => {} // ping, etc.
        }

        events
    }

    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    fn push_block(&mut self, block: Block) {
        self.blocks.push(block);
        self.current = Some(self.blocks.len() - 1);
    }

    fn build_assistant_message(&self) -> AssistantMessage {
        let content: Vec<AssistantContent> = self
            .blocks
            .iter()
            .filter_map(|block| match block {
                Block::Text(text) => Some(AssistantContent::Text { text: text.clone() }),
                Block::ToolUse { .. } => tool_call_from(block).map(AssistantContent::ToolCall),
                Block::Thinking => None,
            })
            .collect();

        let has_tool_calls = content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolCall(_)));
        let stop_reason = match self.stop_reason {
            Some(reason) => reason,
            None if has_tool_calls => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };

        AssistantMessage {
            content,
            usage: Some(self.token_usage()),
            stop_reason: Some(stop_reason),
        }
    }
}

fn tool_call_from(block: &Block) -> Option<ToolCallBlock> {
    match block {
        Block::ToolUse {
            id,
            name,
            arguments_json,
        } => {
            let arguments = if arguments_json.trim().is_empty() {
                Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(arguments_json)
                    .unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
            };
            Some(ToolCallBlock {
                id: ToolCallId::from_raw(id.as_str()),
                name: name.clone(),
                arguments,
            })
        }
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_stop_reason(reason: &str) -> Option<StopReason> {
    match reason {
        "end_turn" => Some(StopReason::EndTurn),
        "tool_use" => Some(StopReason::ToolUse),
        "max_tokens" => Some(StopReason::MaxTokens),
        "stop_sequence" => Some(StopReason::StopSequence),
        _ => None,
    }
}

fn classify_error(err: &ErrorEvent) -> GatewayError {
    match err.error.error_type.as_str() {
        "overloaded_error" => GatewayError::ProviderOverloaded,
        "rate_limit_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" | "permission_error" => {
            GatewayError::AuthenticationFailed(err.error.message.clone())
        }
        "invalid_request_error" => GatewayError::InvalidRequest(err.error.message.clone()),
        _ => GatewayError::ServerError {
            status: 500,
            body: err.error.message.clone(),
        },
    }
}

/// Parse raw SSE text into (event_type, data) pairs.
///
/// Multiple `data:` lines in one event are joined with newlines. An event
/// without an `event:` line is reported under `message`.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |event: &mut String, data: &mut Vec<&str>| {
        if event.is_empty() && data.is_empty() {
            return;
        }
        let name = if event.is_empty() {
            "message".to_string()
        } else {
            std::mem::take(event)
        };
        events.push((name, data.join("\n")));
        data.clear();
    };

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() {
            flush(&mut current_event, &mut data_lines);
        }
    }
    flush(&mut current_event, &mut data_lines);

    events
}

// --- Deserialization types for Anthropic SSE events ---

#[derive(Deserialize)]
struct MessageStartEvent {
    message: MessageStartPayload,
}

#[derive(Deserialize)]
struct MessageStartPayload {
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    content_block: Value,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    delta: Value,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: Option<MessageDeltaPayload>,
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
