//! Base trait for tools

use async_trait::async_trait;
use serde_json::Value;
use skiff_core::RequestContext;

/// Where a tool call came from.
///
/// Every call carries its own context so concurrent calls from different
/// conversations never observe each other's origin.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub channel: String,
    pub chat_id: String,
    pub sender_id: String,
    pub session_key: String,
    pub request: RequestContext,
}

impl ToolContext {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        session_key: impl Into<String>,
        request: RequestContext,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            session_key: session_key.into(),
            request,
        }
    }

    /// Same origin with a different request context
    pub fn with_request(&self, request: RequestContext) -> Self {
        Self {
            request,
            ..self.clone()
        }
    }
}

/// Trait for tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the tool parameters schema (JSON Schema format)
    fn parameters(&self) -> Value;

    /// Execute the tool with arguments
    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String>;

    /// Check required fields against the schema
    fn validate_params(&self, params: &Value) -> Vec<String> {
        let Some(params_obj) = params.as_object() else {
            return vec!["Parameters must be an object".to_string()];
        };

        let schema = self.parameters();
        schema
            .get("required")
            .and_then(|r| r.as_array())
            .into_iter()
            .flatten()
            .filter_map(|field| field.as_str())
            .filter(|field| !params_obj.contains_key(*field))
            .map(|field| format!("Missing required field: {}", field))
            .collect()
    }

    /// Convert tool to OpenAI function schema format
    fn to_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

/// Tool errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Core(#[from] skiff_core::Error),
}

pub type Result<T> = std::result::Result<T, ToolError>;

impl From<ToolError> for skiff_core::Error {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Core(inner) => inner,
            ToolError::NotFound(name) => skiff_core::Error::NotFound(format!("tool {}", name)),
            other => skiff_core::Error::Tool(other.to_string()),
        }
    }
}
