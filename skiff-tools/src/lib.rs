//! Tools for skiff
//!
//! This crate provides the tool trait, the tool registry and the delegation
//! tools that hand work to subagents.

pub mod base;
pub mod delegation;
pub mod registry;

pub use base::{Tool, ToolContext, ToolError};
pub use delegation::{DelegateTool, SpawnTool, WorkflowTool};
pub use registry::ToolRegistry;
