//! Metrics recorder collaborator
//!
//! The core reports side effects through this trait. Every hook defaults to a
//! no-op and holders keep an `Option`, so running without a recorder behaves
//! exactly like running with one.

use std::sync::Arc;
use std::time::Duration;

pub trait MetricsRecorder: Send + Sync {
    fn record_send_attempt(&self, _channel: &str, _attempt: u32) {}

    fn record_send_success(&self, _channel: &str, _attempts: u32) {}

    fn record_send_failure(&self, _channel: &str, _error: &str) {}

    fn record_duplicate_suppressed(&self, _channel: &str, _request_id: &str) {}

    fn record_tool_execution(&self, _tool: &str, _duration: Duration, _is_error: bool) {}

    fn record_subagent_result(&self, _task_id: &str, _ok: bool, _attempts: u32) {}
}

pub type MetricsRecorderPtr = Arc<dyn MetricsRecorder>;

/// Call `f` with the recorder when one is installed
#[inline]
pub fn with_recorder(recorder: &Option<MetricsRecorderPtr>, f: impl FnOnce(&dyn MetricsRecorder)) {
    if let Some(recorder) = recorder {
        f(recorder.as_ref());
    }
}
