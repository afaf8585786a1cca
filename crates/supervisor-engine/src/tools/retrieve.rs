//! Knowledge-base retrieval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use supervisor_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use supervisor_settings::{KnowledgeBaseSettings, HARD_MAX_RESULTS};

/// One search against a knowledge base.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalQuery {
    pub knowledge_base_id: String,
    pub text: String,
    pub number_of_results: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub source: Option<String>,
}

/// Source of snippets for the `retrieve` tool.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Snippet>, ToolError>;
}

/// Posts the query as JSON and expects `{"results": [{content, score, source?}]}`.
pub struct HttpRetriever {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRetriever {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Snippet>, ToolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("retrieval request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed(format!(
                "retrieval service returned {status}: {body}"
            )));
        }

        let parsed: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("bad retrieval response: {e}")))?;
        Ok(parsed.results)
    }
}

/// Result count actually requested: the default when absent, otherwise
/// capped at `max` and never above [`HARD_MAX_RESULTS`]. Over-asking is
/// clamped, never rejected.
pub fn clamp_results(requested: Option<u64>, default: u32, max: u32) -> u32 {
    let cap = max.min(HARD_MAX_RESULTS);
    match requested {
        None => default.min(cap),
        Some(n) => n.min(u64::from(cap)) as u32,
    }
}

pub struct RetrieveTool {
    retriever: Arc<dyn Retriever>,
    knowledge_base_id: String,
    default_results: u32,
    max_results: u32,
    min_score: f64,
}

impl RetrieveTool {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        knowledge_base_id: impl Into<String>,
        settings: &KnowledgeBaseSettings,
    ) -> Self {
        Self {
            retriever,
            knowledge_base_id: knowledge_base_id.into(),
            default_results: settings.default_results,
            max_results: settings.max_results,
            min_score: settings.min_score,
        }
    }
}

#[async_trait]
impl Tool for RetrieveTool {
    fn name(&self) -> &str {
        "retrieve"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a query"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["text"],
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The query text to search for"
                },
                "numberOfResults": {
                    "type": "integer",
                    "description": format!(
                        "Maximum results to return (default {}, max {})",
                        self.default_results, self.max_results
                    )
                },
                "score": {
                    "type": "number",
                    "description": format!("Minimum relevance score (default {})", self.min_score)
                },
                "knowledgeBaseId": {
                    "type": "string",
                    "description": "Knowledge base to search instead of the configured one"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let start = Instant::now();

        let text = args["text"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
        let number_of_results = clamp_results(
            args["numberOfResults"].as_u64(),
            self.default_results,
            self.max_results,
        );
        let min_score = args["score"].as_f64().unwrap_or(self.min_score);
        let knowledge_base_id = args["knowledgeBaseId"]
            .as_str()
            .unwrap_or(&self.knowledge_base_id)
            .to_string();

        let query = RetrievalQuery {
            knowledge_base_id,
            text: text.to_string(),
            number_of_results,
        };
        let snippets = self.retriever.retrieve(&query).await?;
        let kept: Vec<Snippet> = snippets
            .into_iter()
            .filter(|s| s.score >= min_score)
            .take(number_of_results as usize)
            .collect();
        debug!(requested = number_of_results, returned = kept.len(), "retrieve");

        let content = if kept.is_empty() {
            format!("No results found above score threshold {min_score}")
        } else {
            let mut out = format!("Retrieved {} results with score >= {min_score}:\n", kept.len());
            for snippet in &kept {
                out.push_str(&format!("\nScore: {:.4}\n", snippet.score));
                if let Some(source) = &snippet.source {
                    out.push_str(&format!("Source: {source}\n"));
                }
                out.push_str(&format!("Content: {}\n", snippet.content));
            }
            out
        };

        Ok(ToolResult {
            content,
            is_error: false,
            duration: start.elapsed(),
        })
    }
}
