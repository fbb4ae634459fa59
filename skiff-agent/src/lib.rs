//! Agent logic for skiff
//!
//! This crate provides the agent loop, context building and the subagent
//! manager that runs delegated tasks.

pub mod agent_loop;
pub mod context;
pub mod processor;
pub mod subagent;

pub use agent_loop::{AgentLoop, AgentSettings};
pub use context::ContextBuilder;
pub use processor::Processor;
pub use subagent::{SubagentManager, SubagentSettings};
