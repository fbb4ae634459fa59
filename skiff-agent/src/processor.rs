//! Message-processing entry point re-entered by delegated tasks

use async_trait::async_trait;
use skiff_core::{RequestContext, Result};

/// Processes one message for a conversation under an explicit session.
///
/// The subagent manager calls this with a synthetic session and sender so a
/// delegated conversation never reads or writes the originating user's
/// history.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process_for_channel_with_session(
        &self,
        ctx: &RequestContext,
        channel: &str,
        chat_id: &str,
        sender_id: &str,
        session_id: &str,
        content: &str,
    ) -> Result<String>;

    /// Forget a session once its task is finished
    fn release_session(&self, _session_id: &str) {}
}
