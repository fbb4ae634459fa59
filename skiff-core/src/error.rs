//! Error types for skiff

use std::time::Duration;
use thiserror::Error;

/// The main error type for skiff operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Channel communication errors
    #[error("Channel error: {0}")]
    Channel(String),

    /// Provider (LLM) errors
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool execution errors
    #[error("Tool error: {0}")]
    Tool(String),

    /// Validation errors. Returned synchronously and never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// A delegated task ran and failed
    #[error("Task failed: {0}")]
    Task(String),

    /// The message bus queues were closed
    #[error("Message bus closed")]
    BusClosed,

    /// The operation's cancellation token fired
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The operation ran out of time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for cancellation and timeout, which abort retry loops immediately.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled(_) | Error::Timeout(_) | Error::BusClosed)
    }

    /// True for transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !self.is_cancellation() && !matches!(self, Error::Validation(_) | Error::Config(_))
    }
}

/// A specialized Result type for skiff operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Cancelled("stop".into()).is_cancellation());
        assert!(Error::Timeout(Duration::from_secs(1)).is_cancellation());
        assert!(!Error::Task("boom".into()).is_cancellation());

        assert!(Error::Task("boom".into()).is_retryable());
        assert!(Error::Provider("503".into()).is_retryable());
        assert!(!Error::Validation("empty task".into()).is_retryable());
        assert!(!Error::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_timeout_display() {
        let err = Error::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1.5s");
    }
}
