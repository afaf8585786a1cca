//! Conversation turns: the unit stored in a session's history window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped entry of a conversation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub message: Message,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Message::user_text(text))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Message::assistant_text(text))
    }

    pub fn role(&self) -> Role {
        match self.message {
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::ToolResult(_) => Role::Tool,
        }
    }

    pub fn content(&self) -> String {
        self.message.text()
    }
}
