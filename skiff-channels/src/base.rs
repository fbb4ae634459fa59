//! Base trait for channel handlers

use async_trait::async_trait;
use skiff_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for channel handlers
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &str;

    /// Check if the channel is running
    fn is_running(&self) -> bool;

    /// Start the channel handler
    async fn start(&mut self) -> Result<()>;

    /// Stop the channel handler
    async fn stop(&mut self) -> Result<()>;

    /// Send a message
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Check if a sender is allowed
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel error: {0}")]
    Error(String),

    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Channel not running: {0}")]
    NotRunning(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Access denied for sender: {0}")]
    AccessDenied(String),

    #[error(transparent)]
    Bus(#[from] skiff_core::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Base channel implementation with common functionality
#[derive(Clone)]
pub struct BaseChannel {
    /// Channel name
    pub name: String,
    /// Running state
    pub running: bool,
    /// Allowed senders list (empty = allow all)
    pub allow_from: Vec<String>,
    /// Where inbound messages are published
    pub bus: MessageBus,
}

impl BaseChannel {
    /// Create a new base channel
    pub fn new(name: impl Into<String>, allow_from: Vec<String>, bus: MessageBus) -> Self {
        Self {
            name: name.into(),
            running: false,
            allow_from,
            bus,
        }
    }

    /// Check if a sender is allowed
    pub fn is_allowed(&self, sender_id: &str) -> bool {
        if self.allow_from.is_empty() {
            return true;
        }

        if self.allow_from.iter().any(|a| a == sender_id) {
            return true;
        }

        // Compound IDs, e.g. "12345|username"
        sender_id
            .split('|')
            .filter(|part| !part.is_empty())
            .any(|part| self.allow_from.iter().any(|a| a == part))
    }

    /// Publish an incoming message onto the bus after the allow-list check
    pub async fn handle_message(
        &self,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        media: Vec<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let sender_id = sender_id.into();

        if !self.is_allowed(&sender_id) {
            tracing::warn!(
                "Access denied for sender {} on channel {}. Add them to allow_from in config to grant access.",
                sender_id,
                self.name
            );
            return Err(ChannelError::AccessDenied(sender_id));
        }

        let mut msg = InboundMessage::new(self.name.clone(), sender_id, chat_id, content);
        for m in media {
            msg = msg.with_media(m);
        }
        if let Some(meta) = metadata {
            for (key, value) in meta {
                msg = msg.with_metadata(key, value);
            }
        }

        self.bus.publish_inbound(msg).await?;
        Ok(())
    }
}

/// Shared channel handler type
pub type ChannelHandlerPtr = Arc<RwLock<dyn ChannelHandler>>;
