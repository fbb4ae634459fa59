//! LLM provider integrations for skiff
//!
//! This crate provides the provider abstraction used by the agent loop and an
//! OpenAI-compatible HTTP implementation.

pub mod base;
pub mod openai;

pub use base::{
    LLMProvider, LLMResponse, Message, ProviderError, ProviderResult, ToolCallRequest,
};
pub use openai::OpenAiClient;
