use crate::errors::GatewayError;
use crate::ids::ToolCallId;
use crate::messages::{AssistantMessage, StopReason, ToolCallBlock};

/// Backend-native events emitted while a model call streams. Ordering:
///
/// Start → (TextStart → TextDelta* → TextEnd |
///          ToolCallStart → ToolCallDelta* → ToolCallEnd)* → Done
///
/// Error can appear at any point and is terminal.
#[derive(Clone, Debug)]
pub enum BackendEvent {
    Start,

    TextStart,
    TextDelta { delta: String },
    TextEnd { text: String },

    ThinkingDelta { delta: String },

    ToolCallStart { tool_call_id: ToolCallId, name: String },
    ToolCallDelta { tool_call_id: ToolCallId, arguments_delta: String },
    ToolCallEnd { tool_call: ToolCallBlock },

    Done { message: AssistantMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}

impl BackendEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let done = BackendEvent::Done {
            message: AssistantMessage::text("hi"),
            stop_reason: StopReason::EndTurn,
        };
        assert!(done.is_terminal());
        assert!(BackendEvent::Error { error: GatewayError::Cancelled }.is_terminal());

        let delta = BackendEvent::TextDelta { delta: "x".into() };
        assert!(!delta.is_terminal());
    }
}
