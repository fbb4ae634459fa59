//! Base trait for LLM providers

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Error type for provider operations
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl From<ProviderError> for skiff_core::Error {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::ConfigError(msg) => skiff_core::Error::Config(msg),
            other => skiff_core::Error::Provider(other.to_string()),
        }
    }
}

/// A tool call requested by the model.
///
/// `arguments` is always a JSON object. Unparseable argument strings are kept
/// under a `raw` key so the tool can report a useful error.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: normalize_arguments(arguments),
        }
    }
}

/// Coerce wire-format arguments (object or JSON-encoded string) into an object
pub fn normalize_arguments(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                let mut map = Map::new();
                map.insert("raw".to_string(), Value::String(raw));
                Value::Object(map)
            }
        },
        _ => Value::Object(Map::new()),
    }
}

impl Serialize for ToolCallRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        #[derive(Serialize)]
        struct Function<'a> {
            name: &'a str,
            arguments: String,
        }

        let arguments =
            serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".to_string());

        let mut state = serializer.serialize_struct("ToolCallRequest", 3)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("type", "function")?;
        state.serialize_field(
            "function",
            &Function {
                name: &self.name,
                arguments,
            },
        )?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ToolCallRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Function {
            name: String,
            #[serde(default)]
            arguments: Value,
        }

        #[derive(Deserialize)]
        struct Helper {
            id: String,
            #[serde(default)]
            function: Option<Function>,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            arguments: Option<Value>,
        }

        let helper = Helper::deserialize(deserializer)?;
        if let Some(function) = helper.function {
            return Ok(Self::new(helper.id, function.name, function.arguments));
        }

        let name = helper
            .name
            .ok_or_else(|| serde::de::Error::missing_field("function or name"))?;
        Ok(Self::new(
            helper.id,
            name,
            helper.arguments.unwrap_or(Value::Null),
        ))
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: HashMap<String, i64>,
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

impl LLMResponse {
    /// A plain text answer with no tool calls
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: default_finish_reason(),
            usage: HashMap::new(),
        }
    }

    /// A response that only requests tool calls
    pub fn with_tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            usage: HashMap::new(),
        }
    }

    /// Check if response contains tool calls
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A message in the chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    /// Create an assistant message that carries tool calls
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        let mut msg = Self::with_role("assistant", content);
        if !tool_calls.is_empty() {
            msg.tool_calls = Some(tool_calls);
        }
        msg
    }

    /// Create a tool response message
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut msg = Self::with_role("tool", content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// Trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send a chat completion request
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
        model: Option<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> ProviderResult<LLMResponse>;

    /// Get the default model for this provider
    fn get_default_model(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_roundtrips_openai_shape() {
        let call = ToolCallRequest::new("call_1", "spawn", json!({"task": "x"}));
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "spawn");
        assert_eq!(value["function"]["arguments"], r#"{"task":"x"}"#);

        let back: ToolCallRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back, call);
    }

    #[test]
    fn test_unparseable_arguments_kept_raw() {
        let args = normalize_arguments(Value::String("not json".to_string()));
        assert_eq!(args["raw"], "not json");
        assert_eq!(normalize_arguments(Value::Null), json!({}));
    }

    #[test]
    fn test_flat_tool_call_shape() {
        let call: ToolCallRequest =
            serde_json::from_value(json!({"id": "a", "name": "t", "arguments": {"k": 1}}))
                .unwrap();
        assert_eq!(call.name, "t");
        assert_eq!(call.arguments["k"], 1);
    }

    #[test]
    fn test_assistant_with_empty_tools_omits_field() {
        let msg = Message::assistant_with_tools("hi", Vec::new());
        assert!(msg.tool_calls.is_none());
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("tool_calls").is_none());
    }
}
