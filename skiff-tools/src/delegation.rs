//! Subagent delegation tools
//!
//! `spawn` starts a background task that reports back through the bus,
//! `delegate` waits for a task inline, and `workflow` fans a goal out into
//! subtasks. All three forward to a [`Delegator`] using the calling
//! conversation as the reply destination.

use crate::base::{Result, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use serde_json::{json, Value};
use skiff_core::delegation::{Delegator, SubagentTaskRequest, WorkflowMode, WorkflowRequest};
use std::sync::Arc;

fn required_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' parameter is required", key)))
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn task_request(ctx: &ToolContext, args: &Value) -> Result<SubagentTaskRequest> {
    let task = required_str(args, "task")?;
    let mut req = SubagentTaskRequest::new(task)
        .with_origin(&ctx.channel, &ctx.chat_id, &ctx.sender_id)
        .with_request_id(&ctx.request.request_id);
    if let Some(label) = optional_str(args, "label") {
        req = req.with_label(label);
    }
    Ok(req)
}

/// Spawn a subagent in the background
pub struct SpawnTool {
    delegator: Arc<dyn Delegator>,
}

impl SpawnTool {
    pub fn new(delegator: Arc<dyn Delegator>) -> Self {
        Self { delegator }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a subagent to handle a task in the background. \
         Use this for complex or time-consuming tasks that can run independently. \
         The subagent will complete the task and report back when done."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to complete"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short label for the task (for display)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String> {
        // Normalizing here fills the default label the reply shows.
        let req = task_request(ctx, &args)?.normalize()?;
        let label = req.label.clone();
        let task_id = self.delegator.spawn(&ctx.request, req).await?;
        Ok(format!(
            "Subagent [{}] started (id: {}). The result will be sent here when it completes.",
            label, task_id
        ))
    }
}

/// Run a subagent and wait for its answer
pub struct DelegateTool {
    delegator: Arc<dyn Delegator>,
}

impl DelegateTool {
    pub fn new(delegator: Arc<dyn Delegator>) -> Self {
        Self { delegator }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Hand a self-contained task to a subagent and wait for its answer. \
         Use this when the result is needed before replying."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the subagent to complete"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short label for the task"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String> {
        let req = task_request(ctx, &args)?;
        Ok(self.delegator.run_sync(&ctx.request, req).await?)
    }
}

/// Split a goal into subtasks and run each through a subagent
pub struct WorkflowTool {
    delegator: Arc<dyn Delegator>,
}

impl WorkflowTool {
    pub fn new(delegator: Arc<dyn Delegator>) -> Self {
        Self { delegator }
    }
}

#[async_trait]
impl Tool for WorkflowTool {
    fn name(&self) -> &str {
        "workflow"
    }

    fn description(&self) -> &str {
        "Break a goal into subtasks and run each with a subagent, sequentially or in parallel. \
         Returns a summary with the outcome of every subtask."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "goal": {
                    "type": "string",
                    "description": "The overall goal"
                },
                "subtasks": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Explicit subtasks; derived from the goal when omitted"
                },
                "mode": {
                    "type": "string",
                    "enum": ["sequential", "parallel"],
                    "description": "Scheduling mode; parallel by default when there are several subtasks"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short label for the workflow"
                }
            },
            "required": ["goal"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String> {
        let goal = required_str(&args, "goal")?;
        let subtasks: Vec<String> = args
            .get("subtasks")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut req = WorkflowRequest::new(goal)
            .with_subtasks(subtasks)
            .with_origin(&ctx.channel, &ctx.chat_id, &ctx.sender_id)
            .with_request_id(&ctx.request.request_id);
        if let Some(mode) = optional_str(&args, "mode") {
            let mode: WorkflowMode = mode
                .parse()
                .map_err(|e: skiff_core::Error| ToolError::InvalidArguments(e.to_string()))?;
            req = req.with_mode(mode);
        }
        if let Some(label) = optional_str(&args, "label") {
            req.label = label;
        }

        Ok(self.delegator.run_workflow(&ctx.request, req).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use skiff_core::{Error, RequestContext};

    #[derive(Default)]
    struct RecordingDelegator {
        tasks: Mutex<Vec<SubagentTaskRequest>>,
        workflows: Mutex<Vec<WorkflowRequest>>,
    }

    #[async_trait]
    impl Delegator for RecordingDelegator {
        async fn spawn(
            &self,
            _ctx: &RequestContext,
            req: SubagentTaskRequest,
        ) -> skiff_core::Result<String> {
            self.tasks.lock().push(req);
            Ok("subagent-1".to_string())
        }

        async fn run_sync(
            &self,
            _ctx: &RequestContext,
            req: SubagentTaskRequest,
        ) -> skiff_core::Result<String> {
            if req.task == "fail" {
                return Err(Error::Task("boom".to_string()));
            }
            Ok(format!("done: {}", req.task))
        }

        async fn run_workflow(
            &self,
            _ctx: &RequestContext,
            req: WorkflowRequest,
        ) -> skiff_core::Result<String> {
            self.workflows.lock().push(req);
            Ok("total=1".to_string())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(
            "telegram",
            "42",
            "alice",
            "telegram:42",
            RequestContext::new("req-1"),
        )
    }

    #[tokio::test]
    async fn test_spawn_uses_caller_origin() {
        let delegator = Arc::new(RecordingDelegator::default());
        let tool = SpawnTool::new(delegator.clone());

        let result = tool
            .execute(&ctx(), json!({"task": "scan logs", "label": "scan"}))
            .await
            .unwrap();
        assert!(result.contains("subagent-1"));
        assert!(result.contains("[scan]"));

        let tasks = delegator.tasks.lock();
        assert_eq!(tasks[0].origin_channel, "telegram");
        assert_eq!(tasks[0].origin_chat_id, "42");
        assert_eq!(tasks[0].origin_sender_id, "alice");
        assert_eq!(tasks[0].request_id, "req-1");
    }

    #[tokio::test]
    async fn test_spawn_reports_label_derived_from_task() {
        let delegator = Arc::new(RecordingDelegator::default());
        let tool = SpawnTool::new(delegator.clone());

        let result = tool
            .execute(&ctx(), json!({"task": "  count files  "}))
            .await
            .unwrap();
        assert!(result.starts_with("Subagent [count files] started (id: subagent-1)"));
        assert_eq!(delegator.tasks.lock()[0].label, "count files");
    }

    #[tokio::test]
    async fn test_spawn_rejects_blank_task() {
        let delegator = Arc::new(RecordingDelegator::default());
        let tool = SpawnTool::new(delegator.clone());
        let err = tool
            .execute(&ctx(), json!({"task": "   "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Core(Error::Validation(_))));
        assert!(delegator.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_missing_task() {
        let tool = SpawnTool::new(Arc::new(RecordingDelegator::default()));
        let err = tool
            .execute(&ctx(), json!({"label": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'task' parameter is required"));
    }

    #[tokio::test]
    async fn test_delegate_propagates_failure() {
        let tool = DelegateTool::new(Arc::new(RecordingDelegator::default()));
        assert_eq!(
            tool.execute(&ctx(), json!({"task": "sum"})).await.unwrap(),
            "done: sum"
        );
        let err = tool
            .execute(&ctx(), json!({"task": "fail"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Core(Error::Task(_))));
    }

    #[tokio::test]
    async fn test_workflow_parses_mode_and_subtasks() {
        let delegator = Arc::new(RecordingDelegator::default());
        let tool = WorkflowTool::new(delegator.clone());

        tool.execute(
            &ctx(),
            json!({"goal": "ship it", "subtasks": ["build", "test"], "mode": "sequential"}),
        )
        .await
        .unwrap();

        let workflows = delegator.workflows.lock();
        assert_eq!(workflows[0].subtasks, vec!["build", "test"]);
        assert_eq!(workflows[0].mode, Some(WorkflowMode::Sequential));
        assert_eq!(workflows[0].origin_channel, "telegram");
    }

    #[tokio::test]
    async fn test_workflow_rejects_unknown_mode() {
        let tool = WorkflowTool::new(Arc::new(RecordingDelegator::default()));
        let err = tool
            .execute(&ctx(), json!({"goal": "g", "mode": "sideways"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
