//! Tool registry

use super::base::{Result, Tool, ToolContext, ToolError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Unregister a tool by name
    pub fn unregister(&mut self, name: &str) {
        self.tools.remove(name);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool is registered
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool definitions in OpenAI format, sorted by name
    pub fn get_definitions(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.to_schema())
            .collect()
    }

    /// Execute a tool by name.
    ///
    /// Unknown tools and schema violations are errors; the caller decides how
    /// to present them to the model.
    pub async fn execute(&self, ctx: &ToolContext, name: &str, params: Value) -> Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let errors = tool.validate_params(&params);
        if !errors.is_empty() {
            warn!("Rejected {} call from {}: {}", name, ctx.session_key, errors.join("; "));
            return Err(ToolError::InvalidParams(errors.join("; ")));
        }

        debug!("Executing tool {} for {}", name, ctx.session_key);
        tool.execute(ctx, params).await
    }

    /// Get list of registered tool names
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Get number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skiff_core::RequestContext;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String> {
            Ok(format!(
                "{}@{}",
                args["text"].as_str().unwrap_or_default(),
                ctx.channel
            ))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("cli", "direct", "user", "cli:direct", RequestContext::default())
    }

    #[test]
    fn test_register_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert!(registry.has("echo"));
        assert_eq!(registry.get_definitions()[0]["function"]["name"], "echo");
    }

    #[test]
    fn test_unregister_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.unregister("echo");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_execute_tool_sees_context() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let result = registry
            .execute(&ctx(), "echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, "hi@cli");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute(&ctx(), "missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_missing_required_param() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let err = registry
            .execute(&ctx(), "echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Missing required field: text"));
    }
}
