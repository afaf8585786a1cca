use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use supervisor_core::tools::{Tool, ToolContext, ToolError, ToolResult};

use crate::truncate::truncate_output;

pub struct HttpRequestTool {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpRequestTool {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("supervisor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_body_bytes,
        }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP GET or POST request and return the status and response body"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http(s) URL"
                },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST"],
                    "description": "HTTP method (default GET)"
                },
                "headers": {
                    "type": "object",
                    "description": "Extra request headers"
                },
                "body": {
                    "description": "Request body for POST; objects are sent as JSON"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let start = Instant::now();

        let url = args["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("url is required".into()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ToolError::InvalidArguments(format!(
                "url must be http or https: {url}"
            )));
        }

        let method = args["method"].as_str().unwrap_or("GET").to_ascii_uppercase();
        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "unsupported method {other}"
                )))
            }
        };

        if let Some(headers) = args["headers"].as_object() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        request = match &args["body"] {
            serde_json::Value::Null => request,
            serde_json::Value::String(s) => request.body(s.clone()),
            other => request.json(other),
        };

        debug!(%method, url, "http_request");
        let response = tokio::select! {
            biased;
            _ = ctx.abort_signal.cancelled() => return Err(ToolError::Cancelled),
            r = request.send() => r.map_err(|e| ToolError::ExecutionFailed(format!("Request failed: {e}")))?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read response: {e}")))?;
        let content = format!(
            "Status: {}\n\n{}",
            status.as_u16(),
            truncate_output(&body, self.max_body_bytes)
        );

        Ok(ToolResult {
            content,
            is_error: !status.is_success(),
            duration: start.elapsed(),
        })
    }
}
