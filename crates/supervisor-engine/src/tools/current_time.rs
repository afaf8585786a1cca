use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use supervisor_core::tools::{Tool, ToolContext, ToolError, ToolResult};

/// Current UTC time as an ISO 8601 string.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current UTC date and time in ISO 8601 format"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use supervisor_core::ids::SessionId;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn returns_parseable_utc_timestamp() {
        let ctx = ToolContext {
            session_id: SessionId::new(),
            actor_id: None,
            abort_signal: CancellationToken::new(),
        };
        let result = CurrentTimeTool
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.ends_with("+00:00"), "got: {}", result.content);
        assert!(DateTime::parse_from_rfc3339(&result.content).is_ok());
    }
}
