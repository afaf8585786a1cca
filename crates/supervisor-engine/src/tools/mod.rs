pub mod calculator;
pub mod current_time;
pub mod http_request;
pub mod retrieve;

use std::sync::Arc;
use std::time::Duration;

use supervisor_settings::SupervisorSettings;

use crate::error::EngineError;
use crate::registry::ToolRegistry;

use self::retrieve::{HttpRetriever, Retriever, RetrieveTool};

/// Names accepted in `tools.enabled`.
pub const BUILTIN_TOOLS: &[&str] = &["calculator", "current_time", "http_request", "retrieve"];

/// Build the registry of tools enabled in settings.
///
/// `retriever` overrides the HTTP retriever built from
/// `knowledgeBase.endpoint`.
pub fn create_registry(
    settings: &SupervisorSettings,
    retriever: Option<Arc<dyn Retriever>>,
) -> Result<ToolRegistry, EngineError> {
    let mut registry = ToolRegistry::new();
    let http_timeout = Duration::from_secs(settings.tools.http_timeout_secs);

    for name in &settings.tools.enabled {
        match name.as_str() {
            "calculator" => registry.register(Arc::new(calculator::CalculatorTool)),
            "current_time" => registry.register(Arc::new(current_time::CurrentTimeTool)),
            "http_request" => registry.register(Arc::new(http_request::HttpRequestTool::new(
                http_timeout,
                settings.tools.max_output_bytes,
            ))),
            "retrieve" => {
                let kb = &settings.knowledge_base;
                let knowledge_base_id = kb.knowledge_base_id.clone().ok_or_else(|| {
                    EngineError::Configuration(
                        "knowledgeBase.knowledgeBaseId is required for the retrieve tool".into(),
                    )
                })?;
                let retriever: Arc<dyn Retriever> = match (&retriever, &kb.endpoint) {
                    (Some(r), _) => Arc::clone(r),
                    (None, Some(endpoint)) => {
                        Arc::new(HttpRetriever::new(endpoint.clone(), http_timeout))
                    }
                    (None, None) => {
                        return Err(EngineError::Configuration(
                            "knowledgeBase.endpoint is required for the retrieve tool".into(),
                        ))
                    }
                };
                registry.register(Arc::new(RetrieveTool::new(retriever, knowledge_base_id, kb)));
            }
            other => {
                return Err(EngineError::Configuration(format!(
                    "unknown tool {other:?}; expected one of {}",
                    BUILTIN_TOOLS.join(", ")
                )))
            }
        }
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(enabled: &[&str]) -> SupervisorSettings {
        let mut settings = SupervisorSettings::default();
        settings.tools.enabled = enabled.iter().map(|s| s.to_string()).collect();
        settings
    }

    #[test]
    fn no_tools_by_default() {
        let registry = create_registry(&SupervisorSettings::default(), None).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn registers_enabled_tools() {
        let registry =
            create_registry(&settings(&["calculator", "current_time", "http_request"]), None)
                .unwrap();
        assert_eq!(
            registry.names(),
            vec!["calculator", "current_time", "http_request"]
        );
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let err = create_registry(&settings(&["shell"]), None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(msg) if msg.contains("shell")));
    }

    #[test]
    fn retrieve_needs_knowledge_base() {
        let err = create_registry(&settings(&["retrieve"]), None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));

        let mut s = settings(&["retrieve"]);
        s.knowledge_base.knowledge_base_id = Some("kb-1".into());
        assert!(create_registry(&s, None).is_err());

        s.knowledge_base.endpoint = Some("http://127.0.0.1:9/retrieve".into());
        let registry = create_registry(&s, None).unwrap();
        assert!(registry.contains("retrieve"));
    }
}
