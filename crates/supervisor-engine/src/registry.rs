use std::collections::HashMap;
use std::sync::Arc;

use supervisor_core::tools::{Tool, ToolDefinition};

/// Registry of tools a runtime may offer the backend.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the backend, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use supervisor_core::tools::{ToolContext, ToolError, ToolResult};

    struct DummyTool(&'static str);

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok("ok"))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool("calculator")));
        assert!(registry.contains("calculator"));
        assert!(registry.get("calculator").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn definitions_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool("retrieve")));
        registry.register(Arc::new(DummyTool("calculator")));
        registry.register(Arc::new(DummyTool("current_time")));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["calculator", "current_time", "retrieve"]);
        assert_eq!(registry.names(), names);
    }

    #[test]
    fn same_name_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool("calculator")));
        registry.register(Arc::new(DummyTool("calculator")));
        assert_eq!(registry.count(), 1);
    }
}
