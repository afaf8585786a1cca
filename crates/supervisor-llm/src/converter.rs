use serde_json::{json, Value};

use supervisor_core::context::{LlmContext, Stability, SystemBlock};
use supervisor_core::messages::{
    AssistantContent, AssistantMessage, Message, ToolCallBlock, ToolResultMessage,
};
use supervisor_core::provider::GenerationOptions;

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert an LlmContext into the Anthropic Messages API request body.
pub fn build_request_body(context: &LlmContext, options: &GenerationOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "stream": true,
        "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }
    if !options.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(options.stop_sequences);
    }

    let system_blocks = convert_system_blocks(&context.system_blocks);
    if !system_blocks.is_empty() {
        body["system"] = json!(system_blocks);
    }

    body["messages"] = json!(convert_messages(&context.messages));

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// System blocks in Anthropic's format. The last stable block carries a
/// cache breakpoint.
fn convert_system_blocks(blocks: &[SystemBlock]) -> Vec<Value> {
    let last_stable_idx = blocks.iter().rposition(|b| b.stability == Stability::Stable);

    blocks
        .iter()
        .enumerate()
        .map(|(i, block)| {
            let mut entry = json!({"type": "text", "text": block.content});
            if Some(i) == last_stable_idx {
                entry["cache_control"] = json!({"type": "ephemeral"});
            }
            entry
        })
        .collect()
}

/// Convert messages, merging consecutive same-role entries since the API
/// requires user/assistant alternation (tool results travel as user content).
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages {
        let (role, blocks) = match msg {
            Message::User(user) => ("user", vec![json!({"type": "text", "text": user.text})]),
            Message::Assistant(asst) => ("assistant", convert_assistant_content(asst)),
            Message::ToolResult(tr) => ("user", vec![convert_tool_result(tr)]),
        };
        if blocks.is_empty() {
            continue;
        }

        match result.last_mut() {
            Some(last) if last["role"] == role => {
                if let Some(content) = last["content"].as_array_mut() {
                    content.extend(blocks);
                }
            }
            _ => result.push(json!({"role": role, "content": blocks})),
        }
    }

    result
}

fn convert_assistant_content(msg: &AssistantMessage) -> Vec<Value> {
    msg.content
        .iter()
        .filter_map(|c| match c {
            AssistantContent::Text { text } if text.is_empty() => None,
            AssistantContent::Text { text } => Some(json!({"type": "text", "text": text})),
            AssistantContent::ToolCall(tc) => Some(convert_tool_call(tc)),
        })
        .collect()
}

fn convert_tool_call(tc: &ToolCallBlock) -> Value {
    json!({
        "type": "tool_use",
        "id": tc.id.as_str(),
        "name": tc.name,
        "input": tc.arguments,
    })
}

fn convert_tool_result(msg: &ToolResultMessage) -> Value {
    let mut block = json!({
        "type": "tool_result",
        "tool_use_id": msg.tool_call_id.as_str(),
        "content": [{"type": "text", "text": msg.content}],
    });
    if msg.is_error {
        block["is_error"] = json!(true);
    }
    block
}
