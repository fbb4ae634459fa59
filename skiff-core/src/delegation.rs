//! Delegation requests and the delegator seam used by tools
//!
//! A delegated task re-enters the agent under a synthetic identity. The
//! request types here are normalized before execution so every task carries
//! a valid reply destination.

use crate::bus::new_request_id;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::utils::truncate_chars;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_ORIGIN_CHANNEL: &str = "cli";
pub const DEFAULT_ORIGIN_CHAT_ID: &str = "direct";
pub const DEFAULT_ORIGIN_SENDER_ID: &str = "user";

const LABEL_MAX_CHARS: usize = 30;

static GOAL_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[;.；。]+").expect("static separator pattern"));

/// A single delegated task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubagentTaskRequest {
    pub task: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub origin_channel: String,
    #[serde(default)]
    pub origin_chat_id: String,
    #[serde(default)]
    pub origin_sender_id: String,
    #[serde(default)]
    pub request_id: String,
}

impl SubagentTaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    /// Set the reply destination
    pub fn with_origin(
        mut self,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        self.origin_channel = channel.into();
        self.origin_chat_id = chat_id.into();
        self.origin_sender_id = sender_id.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Validate and fill defaults.
    pub fn normalize(mut self) -> Result<Self> {
        self.task = self.task.trim().to_string();
        if self.task.is_empty() {
            return Err(Error::Validation("task must not be empty".to_string()));
        }
        default_if_blank(&mut self.origin_channel, DEFAULT_ORIGIN_CHANNEL);
        default_if_blank(&mut self.origin_chat_id, DEFAULT_ORIGIN_CHAT_ID);
        default_if_blank(&mut self.origin_sender_id, DEFAULT_ORIGIN_SENDER_ID);
        if self.label.trim().is_empty() {
            self.label = truncate_chars(&self.task, LABEL_MAX_CHARS);
        }
        if self.request_id.trim().is_empty() {
            self.request_id = new_request_id();
        }
        Ok(self)
    }
}

/// How workflow subtasks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    Sequential,
    Parallel,
}

impl fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowMode::Sequential => f.write_str("sequential"),
            WorkflowMode::Parallel => f.write_str("parallel"),
        }
    }
}

impl FromStr for WorkflowMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "serial" => Ok(WorkflowMode::Sequential),
            "parallel" => Ok(WorkflowMode::Parallel),
            other => Err(Error::Validation(format!("unknown workflow mode: {}", other))),
        }
    }
}

/// A goal decomposed into subtasks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub goal: String,
    #[serde(default)]
    pub mode: Option<WorkflowMode>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub origin_channel: String,
    #[serde(default)]
    pub origin_chat_id: String,
    #[serde(default)]
    pub origin_sender_id: String,
    #[serde(default)]
    pub request_id: String,
}

/// A workflow after normalization: subtasks are never empty and mode is resolved
#[derive(Debug, Clone)]
pub struct NormalizedWorkflow {
    pub goal: String,
    pub mode: WorkflowMode,
    pub subtasks: Vec<String>,
    pub label: String,
    pub origin_channel: String,
    pub origin_chat_id: String,
    pub origin_sender_id: String,
    pub request_id: String,
}

impl WorkflowRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn with_subtasks<I, S>(mut self, subtasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtasks = subtasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: WorkflowMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_origin(
        mut self,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Self {
        self.origin_channel = channel.into();
        self.origin_chat_id = chat_id.into();
        self.origin_sender_id = sender_id.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Validate, decompose the goal when no subtasks were given, and resolve the mode.
    pub fn normalize(self) -> Result<NormalizedWorkflow> {
        let goal = self.goal.trim().to_string();
        let mut subtasks: Vec<String> = self
            .subtasks
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if subtasks.is_empty() {
            if goal.is_empty() {
                return Err(Error::Validation("workflow goal must not be empty".to_string()));
            }
            subtasks = split_goal(&goal);
        }

        let mode = self.mode.unwrap_or(if subtasks.len() > 1 {
            WorkflowMode::Parallel
        } else {
            WorkflowMode::Sequential
        });

        let display_goal = if goal.is_empty() {
            subtasks.join("; ")
        } else {
            goal
        };

        let mut normalized = NormalizedWorkflow {
            label: if self.label.trim().is_empty() {
                truncate_chars(&display_goal, LABEL_MAX_CHARS)
            } else {
                self.label
            },
            goal: display_goal,
            mode,
            subtasks,
            origin_channel: self.origin_channel,
            origin_chat_id: self.origin_chat_id,
            origin_sender_id: self.origin_sender_id,
            request_id: self.request_id,
        };
        default_if_blank(&mut normalized.origin_channel, DEFAULT_ORIGIN_CHANNEL);
        default_if_blank(&mut normalized.origin_chat_id, DEFAULT_ORIGIN_CHAT_ID);
        default_if_blank(&mut normalized.origin_sender_id, DEFAULT_ORIGIN_SENDER_ID);
        if normalized.request_id.trim().is_empty() {
            normalized.request_id = new_request_id();
        }
        Ok(normalized)
    }
}

/// Split a goal on sentence and clause separators, falling back to the whole goal.
pub fn split_goal(goal: &str) -> Vec<String> {
    let parts: Vec<String> = GOAL_SEPARATORS
        .split(goal)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        vec![goal.trim().to_string()]
    } else {
        parts
    }
}

fn default_if_blank(field: &mut String, default: &str) {
    if field.trim().is_empty() {
        *field = default.to_string();
    }
}

/// Executes delegated work on behalf of tools
#[async_trait]
pub trait Delegator: Send + Sync {
    /// Start a task in the background and return its id
    async fn spawn(&self, ctx: &RequestContext, req: SubagentTaskRequest) -> Result<String>;

    /// Run a task inline and return its output
    async fn run_sync(&self, ctx: &RequestContext, req: SubagentTaskRequest) -> Result<String>;

    /// Run a workflow and return its summary
    async fn run_workflow(&self, ctx: &RequestContext, req: WorkflowRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults_origin() {
        let req = SubagentTaskRequest::new("  look this up ").normalize().unwrap();
        assert_eq!(req.task, "look this up");
        assert_eq!(req.origin_channel, "cli");
        assert_eq!(req.origin_chat_id, "direct");
        assert_eq!(req.origin_sender_id, "user");
        assert_eq!(req.label, "look this up");
        assert!(!req.request_id.is_empty());
    }

    #[test]
    fn test_task_keeps_given_origin_and_request_id() {
        let req = SubagentTaskRequest::new("x")
            .with_origin("telegram", "42", "alice")
            .with_request_id("req-9")
            .normalize()
            .unwrap();
        assert_eq!(req.origin_channel, "telegram");
        assert_eq!(req.origin_chat_id, "42");
        assert_eq!(req.request_id, "req-9");
    }

    #[test]
    fn test_empty_task_is_validation_error() {
        let err = SubagentTaskRequest::new("   ").normalize().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_long_label_truncated() {
        let req = SubagentTaskRequest::new("a".repeat(80)).normalize().unwrap();
        assert!(req.label.chars().count() <= 33);
        assert!(req.label.ends_with("..."));
    }

    #[test]
    fn test_split_goal_on_ascii_and_cjk_separators() {
        assert_eq!(
            split_goal("find flights; book hotel. email summary"),
            vec!["find flights", "book hotel", "email summary"]
        );
        assert_eq!(split_goal("查天气。订酒店；"), vec!["查天气", "订酒店"]);
    }

    #[test]
    fn test_split_goal_falls_back_to_goal() {
        assert_eq!(split_goal("single task"), vec!["single task"]);
        assert_eq!(split_goal(";;"), vec![";;"]);
    }

    #[test]
    fn test_workflow_mode_defaults() {
        let one = WorkflowRequest::new("only one thing").normalize().unwrap();
        assert_eq!(one.mode, WorkflowMode::Sequential);
        assert_eq!(one.subtasks, vec!["only one thing"]);

        let many = WorkflowRequest::new("a; b; c").normalize().unwrap();
        assert_eq!(many.mode, WorkflowMode::Parallel);
        assert_eq!(many.subtasks.len(), 3);

        let forced = WorkflowRequest::new("a; b")
            .with_mode(WorkflowMode::Sequential)
            .normalize()
            .unwrap();
        assert_eq!(forced.mode, WorkflowMode::Sequential);
    }

    #[test]
    fn test_workflow_explicit_subtasks_win() {
        let wf = WorkflowRequest::new("goal. with. dots")
            .with_subtasks(["first", " ", "second"])
            .normalize()
            .unwrap();
        assert_eq!(wf.subtasks, vec!["first", "second"]);
    }

    #[test]
    fn test_empty_workflow_is_validation_error() {
        let err = WorkflowRequest::new("  ").normalize().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_workflow_mode_parse() {
        assert_eq!("Parallel".parse::<WorkflowMode>().unwrap(), WorkflowMode::Parallel);
        assert_eq!("sequential".parse::<WorkflowMode>().unwrap(), WorkflowMode::Sequential);
        assert!("sideways".parse::<WorkflowMode>().is_err());
    }
}
