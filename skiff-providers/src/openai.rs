//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::base::{
    LLMProvider, LLMResponse, Message, ProviderError, ProviderResult, ToolCallRequest,
};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

/// Client for any server speaking the OpenAI chat completions protocol
pub struct OpenAiClient {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    extra_headers: HashMap<String, String>,
}

impl OpenAiClient {
    pub fn new(
        api_key: Option<String>,
        api_base: Option<String>,
        default_model: impl Into<String>,
        extra_headers: Option<HashMap<String, String>>,
    ) -> Self {
        let api_base = api_base
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_key = api_key.filter(|key| !key.trim().is_empty());

        Self {
            client: Client::builder()
                .http1_only()
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_base,
            api_key,
            default_model: default_model.into(),
            extra_headers: extra_headers.unwrap_or_default(),
        }
    }

    /// Build a client from the `provider` and `agents.defaults` config sections
    pub fn from_config(config: &skiff_core::config::Config) -> Self {
        Self::new(
            Some(config.provider.api_key.clone()),
            config.provider.api_base.clone(),
            config.agents.defaults.model.clone(),
            config.provider.extra_headers.clone(),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn apply_headers(&self, mut req_builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }
        for (key, value) in &self.extra_headers {
            req_builder = req_builder.header(key, value);
        }
        req_builder
    }

    fn parse_response(response: ChatCompletionResponse) -> ProviderResult<LLMResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        let mut usage = HashMap::new();
        usage.insert("prompt_tokens".to_string(), response.usage.prompt_tokens);
        usage.insert(
            "completion_tokens".to_string(),
            response.usage.completion_tokens,
        );
        usage.insert("total_tokens".to_string(), response.usage.total_tokens);

        Ok(LLMResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

#[async_trait]
impl LLMProvider for OpenAiClient {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Option<Vec<Value>>,
        model: Option<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> ProviderResult<LLMResponse> {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        let tools = tools.filter(|t| !t.is_empty());
        let tool_choice = tools.as_ref().map(|_| "auto".to_string());

        let request = ChatCompletionRequest {
            model: model.clone(),
            messages,
            tools,
            tool_choice,
            max_tokens,
            temperature,
        };

        debug!("Sending chat request to {} with model {}", self.api_base, model);

        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .apply_headers(self.client.post(&url).json(&request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let response_data: ChatCompletionResponse = response.json().await?;
        Self::parse_response(response_data)
    }

    fn get_default_model(&self) -> String {
        self.default_model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base_normalized() {
        let client = OpenAiClient::new(None, Some("http://localhost:4000/ ".into()), "m", None);
        assert_eq!(client.api_base(), "http://localhost:4000");

        let client = OpenAiClient::new(None, Some("  ".into()), "m", None);
        assert_eq!(client.api_base(), DEFAULT_API_BASE);
    }

    #[tokio::test]
    async fn test_chat_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "spawn", "arguments": "{\"task\":\"scan\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        }"#;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("sk-test".into()), Some(server.url()), "gpt", None);
        let response = client
            .chat(vec![Message::user("hi")], None, None, 64, 0.0)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].name, "spawn");
        assert_eq!(response.tool_calls[0].arguments["task"], "scan");
        assert_eq!(response.usage["total_tokens"], 7);
    }

    #[tokio::test]
    async fn test_chat_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = OpenAiClient::new(None, Some(server.url()), "gpt", None);
        let err = client
            .chat(vec![Message::user("hi")], None, None, 64, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ApiError(ref msg) if msg.contains("boom")));
    }
}
