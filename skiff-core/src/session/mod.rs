//! Session management for conversation history

pub mod manager;
pub mod store;

pub use manager::SessionManager;
pub use store::{ChatMessage, Session};
