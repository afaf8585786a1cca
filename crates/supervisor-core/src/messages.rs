use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// A message in the backend's conversation format.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultMessage),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolResultMessage {
    pub tool_call_id: ToolCallId,
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum AssistantContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallBlock),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallBlock {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn tool_result(tool_call_id: ToolCallId, text: impl Into<String>, is_error: bool) -> Self {
        Message::ToolResult(ToolResultMessage {
            tool_call_id,
            content: text.into(),
            is_error,
        })
    }

    /// Plain text carried by the message (assistant text blocks are joined).
    pub fn text(&self) -> String {
        match self {
            Message::User(m) => m.text.clone(),
            Message::Assistant(m) => m.text_content(),
            Message::ToolResult(m) => m.content.clone(),
        }
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantContent::Text { text: text.into() }],
            usage: None,
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolCall(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_message() {
        let msg = Message::user_text("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn assistant_text_joins_blocks() {
        let msg = AssistantMessage {
            content: vec![
                AssistantContent::Text { text: "Hello, ".into() },
                AssistantContent::ToolCall(ToolCallBlock {
                    id: ToolCallId::new(),
                    name: "calculator".into(),
                    arguments: serde_json::json!({"expression": "1+1"}),
                }),
                AssistantContent::Text { text: "world".into() },
            ],
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        };
        assert_eq!(msg.text_content(), "Hello, world");
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls()[0].name, "calculator");
    }

    #[test]
    fn tool_result_error_flag_omitted_when_false() {
        let ok = Message::tool_result(ToolCallId::from_raw("t1"), "42", false);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert!(json.get("is_error").is_none());

        let failed = Message::tool_result(ToolCallId::from_raw("t2"), "boom", true);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["is_error"], true);
    }

    #[test]
    fn stop_reason_serialization() {
        assert_eq!(serde_json::to_string(&StopReason::EndTurn).unwrap(), r#""end_turn""#);
        assert_eq!(serde_json::to_string(&StopReason::ToolUse).unwrap(), r#""tool_use""#);
    }
}
