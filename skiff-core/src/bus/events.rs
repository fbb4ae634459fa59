//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Reserved channel for control-plane messages. Never routed to an adapter.
pub const SYSTEM_CHANNEL: &str = "system";

/// `metadata["type"]` tag carried by subagent completion messages
pub const SUBAGENT_RESULT_TYPE: &str = "subagent_result";

/// Generate a fresh request id
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Message received from a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g., "telegram", "console", "system")
    pub channel: String,
    /// User identifier
    pub sender_id: String,
    /// Chat/channel identifier
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Media URLs (if any)
    pub media: Vec<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// Idempotence and tracing key
    pub request_id: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
    /// Explicit session, overriding `channel:chat_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id_override: Option<String>,
}

impl InboundMessage {
    /// Create a new inbound message with a fresh request id
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
            request_id: new_request_id(),
            timestamp: Utc::now(),
            session_id_override: None,
        }
    }

    /// Get the unique session key for this message
    pub fn session_key(&self) -> String {
        match &self.session_id_override {
            Some(session) if !session.is_empty() => session.clone(),
            _ => format!("{}:{}", self.channel, self.chat_id),
        }
    }

    /// Whether this is a control-plane message
    pub fn is_system(&self) -> bool {
        self.channel == SYSTEM_CHANNEL
    }

    /// The `metadata["type"]` tag, if it is a string
    pub fn message_type(&self) -> Option<&str> {
        self.metadata_str("type")
    }

    /// Read a string metadata value
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Add media URL to the message
    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media.push(url.into());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Pin the message to an explicit session
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id_override = Some(session_id.into());
        self
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Target chat/channel identifier
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Optional message to reply to
    pub reply_to: Option<String>,
    /// Media URLs to attach
    pub media: Vec<String>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// Idempotence key used by delivery dedup. Stable across retries.
    pub request_id: String,
}

impl OutboundMessage {
    /// Create a new outbound message with a fresh request id
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
            request_id: new_request_id(),
        }
    }

    /// Set the reply-to message ID
    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// Add media URL to the message
    pub fn with_media(mut self, url: impl Into<String>) -> Self {
        self.media.push(url.into());
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_defaults_to_channel_and_chat() {
        let msg = InboundMessage::new("telegram", "u1", "42", "hi");
        assert_eq!(msg.session_key(), "telegram:42");
    }

    #[test]
    fn test_session_key_override() {
        let msg = InboundMessage::new("telegram", "u1", "42", "hi").with_session("subagent:subagent-1");
        assert_eq!(msg.session_key(), "subagent:subagent-1");
    }

    #[test]
    fn test_request_ids_are_distinct_but_stable_across_clones() {
        let a = OutboundMessage::new("console", "direct", "one");
        let b = OutboundMessage::new("console", "direct", "one");
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.clone().request_id, a.request_id);
    }

    #[test]
    fn test_system_message_type() {
        let msg = InboundMessage::new(SYSTEM_CHANNEL, "subagent", "cli:direct", "done")
            .with_metadata("type", SUBAGENT_RESULT_TYPE);
        assert!(msg.is_system());
        assert_eq!(msg.message_type(), Some(SUBAGENT_RESULT_TYPE));
    }
}
