//! In-memory session manager
//!
//! Durable history is an external collaborator; this manager only keeps
//! sessions for the lifetime of the process. It is shared between the main
//! loop and concurrently running delegated tasks, so every call takes the
//! lock for a short, non-async critical section.
//!
//! Memory stays bounded: each session keeps at most `max_messages` messages,
//! and sessions idle for longer than `idle_ttl` are evicted by a lazy sweep
//! on write.

use super::store::{ChatMessage, Session};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default number of messages kept per session
pub const DEFAULT_MAX_MESSAGES: usize = 50;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Sessions {
    map: HashMap<String, Session>,
    last_sweep: Instant,
}

/// Manages conversation sessions
#[derive(Debug)]
pub struct SessionManager {
    sessions: Mutex<Sessions>,
    max_messages: usize,
    idle_ttl: Option<Duration>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_MESSAGES, None)
    }

    /// Keep at most `max_messages` per session and evict sessions idle longer
    /// than `idle_ttl`
    pub fn with_limits(max_messages: usize, idle_ttl: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_messages: max_messages.max(1),
            idle_ttl,
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Recent history for a session (empty if it does not exist yet)
    pub fn history(&self, key: &str, max_messages: usize) -> Vec<ChatMessage> {
        self.sessions
            .lock()
            .map
            .get(key)
            .map(|s| s.get_history(max_messages))
            .unwrap_or_default()
    }

    /// Append a user/assistant exchange, creating the session if needed
    pub fn record_exchange(&self, key: &str, user: &str, assistant: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(ttl) = self.idle_ttl {
            if sessions.last_sweep.elapsed() >= SWEEP_INTERVAL.min(ttl) {
                Self::sweep(&mut sessions, ttl);
            }
        }
        let session = sessions
            .map
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.add_message("user", user);
        session.add_message("assistant", assistant);
        session.truncate_to(self.max_messages);
    }

    /// Evict sessions idle for longer than `max_idle`; returns how many were dropped
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        Self::sweep(&mut self.sessions.lock(), max_idle)
    }

    fn sweep(sessions: &mut Sessions, max_idle: Duration) -> usize {
        sessions.last_sweep = Instant::now();
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;
        let before = sessions.map.len();
        sessions.map.retain(|_, s| s.updated_at > cutoff);
        let evicted = before - sessions.map.len();
        if evicted > 0 {
            debug!("Evicted {} idle session(s)", evicted);
        }
        evicted
    }

    /// Drop a session
    pub fn remove(&self, key: &str) -> bool {
        self.sessions.lock().map.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions.lock().map.contains_key(key)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of all live sessions
    pub fn keys(&self) -> Vec<String> {
        self.sessions.lock().map.keys().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_read_history() {
        let manager = SessionManager::new();
        manager.record_exchange("telegram:123", "Hello", "Hi!");

        let history = manager.history("telegram:123", 50);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].content, "Hi!");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let manager = SessionManager::new();
        manager.record_exchange("cli:direct", "mine", "ok");
        assert!(manager.history("subagent:subagent-1", 50).is_empty());
    }

    #[test]
    fn test_remove_session() {
        let manager = SessionManager::new();
        manager.record_exchange("a", "q", "r");
        assert!(manager.remove("a"));
        assert!(!manager.contains("a"));
        assert!(!manager.remove("a"));
    }

    #[test]
    fn test_stored_history_is_capped() {
        let manager = SessionManager::with_limits(10, None);
        for i in 0..5000 {
            manager.record_exchange("cli:direct", &format!("q{}", i), &format!("a{}", i));
        }

        let history = manager.history("cli:direct", usize::MAX);
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "q4995");
        assert_eq!(history[9].content, "a4999");
    }

    #[test]
    fn test_evict_idle_sessions() {
        let manager = SessionManager::new();
        manager.record_exchange("old", "q", "r");
        std::thread::sleep(Duration::from_millis(30));
        manager.record_exchange("fresh", "q", "r");

        assert_eq!(manager.evict_idle(Duration::from_millis(15)), 1);
        assert!(!manager.contains("old"));
        assert!(manager.contains("fresh"));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_write_sweeps_idle_sessions() {
        let manager = SessionManager::with_limits(10, Some(Duration::from_millis(15)));
        manager.record_exchange("old", "q", "r");
        std::thread::sleep(Duration::from_millis(30));

        manager.record_exchange("fresh", "q", "r");
        assert_eq!(manager.keys(), vec!["fresh".to_string()]);
    }
}
