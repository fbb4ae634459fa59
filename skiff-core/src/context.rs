//! Per-request context threaded through the loop, tools and subagents

use crate::bus::new_request_id;
use tokio_util::sync::CancellationToken;

/// Cancellation, tracing and delegation depth for one unit of work
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Fires when the caller gives up on this work
    pub cancel: CancellationToken,
    /// Tracing key of the originating message
    pub request_id: String,
    /// How many delegation hops separate this work from a user message
    pub depth: u32,
}

impl RequestContext {
    /// Root context for a fresh request
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            request_id: request_id.into(),
            depth: 0,
        }
    }

    /// Root context bound to an existing token
    pub fn with_token(cancel: CancellationToken, request_id: impl Into<String>) -> Self {
        Self {
            cancel,
            request_id: request_id.into(),
            depth: 0,
        }
    }

    /// Same request, child cancellation token
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            request_id: self.request_id.clone(),
            depth: self.depth,
        }
    }

    /// Child context one delegation hop deeper
    pub fn delegated(&self, cancel: CancellationToken, request_id: impl Into<String>) -> Self {
        Self {
            cancel,
            request_id: request_id.into(),
            depth: self.depth + 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(new_request_id())
    }
}
