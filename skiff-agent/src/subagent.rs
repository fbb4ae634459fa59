//! Subagent management for delegated tasks
//!
//! A delegated task re-enters the agent through [`Processor`] under the
//! synthetic session `subagent:<task_id>`. Every attempt passes the admission
//! gate, failed attempts are retried with a short linear backoff, and each
//! task runs under a timeout whose expiry cancels the task's token.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skiff_core::bus::{InboundMessage, MessageBus, SUBAGENT_RESULT_TYPE, SYSTEM_CHANNEL};
use skiff_core::config::SubagentConfig;
use skiff_core::delegation::{
    Delegator, NormalizedWorkflow, SubagentTaskRequest, WorkflowMode, WorkflowRequest,
};
use skiff_core::metrics::with_recorder;
use skiff_core::utils::truncate_chars;
use skiff_core::{AdmissionGate, Error, MetricsRecorderPtr, RequestContext, Result};

use crate::processor::Processor;

/// Prefix of delegated session and sender identities
pub const SUBAGENT_SESSION_PREFIX: &str = "subagent:";

const RETRY_STEP: Duration = Duration::from_millis(150);
const RETRY_STEP_CAP: u32 = 3;

/// Limits applied to delegated work
#[derive(Debug, Clone)]
pub struct SubagentSettings {
    pub max_concurrency: usize,
    pub retry: u32,
    pub timeout: Duration,
    /// Maximum delegation nesting; 0 disables the cap.
    ///
    /// A task keeps its gate slot while a nested delegation waits for another,
    /// so a depth above `max_concurrency` can stall until the task timeout.
    /// Configuration validation rejects that combination.
    pub max_depth: u32,
}

impl SubagentSettings {
    pub fn from_config(config: &SubagentConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            retry: config.retry,
            timeout: config.timeout(),
            max_depth: config.max_depth,
        }
    }
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self::from_config(&SubagentConfig::default())
    }
}

/// Wait before the attempt after `attempt` (1-based)
fn retry_delay(attempt: u32) -> Duration {
    RETRY_STEP * attempt.clamp(1, RETRY_STEP_CAP)
}

fn session_for(task_id: &str) -> String {
    format!("{}{}", SUBAGENT_SESSION_PREFIX, task_id)
}

struct SubagentInner {
    bus: MessageBus,
    processor: OnceCell<Weak<dyn Processor>>,
    gate: AdmissionGate,
    next_id: AtomicU64,
    running: AtomicUsize,
    settings: SubagentSettings,
    shutdown: CancellationToken,
    metrics: Option<MetricsRecorderPtr>,
}

/// Runs delegated tasks with bounded concurrency, retries and timeouts.
///
/// Cloning is cheap; clones share the id counter, gate and processor.
#[derive(Clone)]
pub struct SubagentManager {
    inner: Arc<SubagentInner>,
}

impl SubagentManager {
    /// Create a new subagent manager
    pub fn new(
        bus: MessageBus,
        settings: SubagentSettings,
        metrics: Option<MetricsRecorderPtr>,
    ) -> Self {
        Self {
            inner: Arc::new(SubagentInner {
                bus,
                processor: OnceCell::new(),
                gate: AdmissionGate::new(settings.max_concurrency),
                next_id: AtomicU64::new(0),
                running: AtomicUsize::new(0),
                settings,
                shutdown: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// Bind the processor delegated tasks re-enter. Only the first binding counts.
    pub fn bind_processor(&self, processor: Weak<dyn Processor>) -> bool {
        let bound = self.inner.processor.set(processor).is_ok();
        if !bound {
            warn!("Subagent processor already bound; ignoring rebind");
        }
        bound
    }

    pub fn settings(&self) -> &SubagentSettings {
        &self.inner.settings
    }

    /// Number of background spawns still running
    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Cancel every background spawn
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn processor(&self) -> Result<Arc<dyn Processor>> {
        self.inner
            .processor
            .get()
            .ok_or_else(|| Error::Internal("subagent processor not bound".to_string()))?
            .upgrade()
            .ok_or_else(|| Error::Internal("subagent processor dropped".to_string()))
    }

    fn next_task_id(&self) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("subagent-{}", n)
    }

    fn check_depth(&self, ctx: &RequestContext) -> Result<()> {
        let max_depth = self.inner.settings.max_depth;
        if max_depth > 0 && ctx.depth >= max_depth {
            return Err(Error::Validation(format!(
                "delegation depth limit of {} reached",
                max_depth
            )));
        }
        Ok(())
    }

    /// One attempt: re-enter the processor under the task's synthetic identity
    async fn execute_once(
        processor: &dyn Processor,
        parent: &RequestContext,
        token: &CancellationToken,
        task_id: &str,
        req: &SubagentTaskRequest,
    ) -> Result<String> {
        let session = session_for(task_id);
        let ctx = parent.delegated(token.clone(), req.request_id.clone());
        processor
            .process_for_channel_with_session(
                &ctx,
                &req.origin_channel,
                &req.origin_chat_id,
                &session,
                &session,
                &req.task,
            )
            .await
    }

    /// Gate and retry around [`Self::execute_once`]
    async fn execute_with_retry(
        &self,
        parent: &RequestContext,
        token: &CancellationToken,
        task_id: &str,
        req: &SubagentTaskRequest,
        attempts: &mut u32,
    ) -> Result<String> {
        let processor = self.processor()?;
        let max_attempts = self.inner.settings.retry.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts = attempt;

            let result = {
                let _permit = self.inner.gate.acquire(token).await?;
                debug!("Subagent [{}] attempt {}/{}", task_id, attempt, max_attempts);
                Self::execute_once(processor.as_ref(), parent, token, task_id, req).await
            };

            let err = match result {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };
            if err.is_cancellation() || !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let delay = retry_delay(attempt);
            warn!(
                "Subagent [{}] attempt {}/{} failed: {}; retrying in {:?}",
                task_id, attempt, max_attempts, err, delay
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(Error::Cancelled(format!("subagent {} cancelled during backoff", task_id)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one task under the timeout over a child of the caller's token
    async fn execute_with_policy(
        &self,
        parent: &RequestContext,
        task_id: &str,
        req: &SubagentTaskRequest,
    ) -> Result<String> {
        let timeout = self.inner.settings.timeout;
        let token = parent.cancel.child_token();
        let mut attempts = 0;

        let result = match tokio::time::timeout(
            timeout,
            self.execute_with_retry(parent, &token, task_id, req, &mut attempts),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                warn!("Subagent [{}] timed out after {:?}", task_id, timeout);
                Err(Error::Timeout(timeout))
            }
        };

        if let Ok(processor) = self.processor() {
            processor.release_session(&session_for(task_id));
        }
        with_recorder(&self.inner.metrics, |m| {
            m.record_subagent_result(task_id, result.is_ok(), attempts)
        });
        result
    }

    /// Publish the single completion message for a background spawn
    async fn publish_result(&self, task_id: &str, req: &SubagentTaskRequest, result: Result<String>) {
        let (content, status) = match result {
            Ok(output) => {
                info!("Subagent [{}] completed successfully", task_id);
                (output, "ok".to_string())
            }
            Err(e) => {
                error!("Subagent [{}] failed: {}", task_id, e);
                (format!("Error: {}", e), e.to_string())
            }
        };

        let msg = InboundMessage::new(
            SYSTEM_CHANNEL,
            "subagent",
            format!("{}:{}", req.origin_channel, req.origin_chat_id),
            content,
        )
        .with_request_id(req.request_id.clone())
        .with_metadata("type", SUBAGENT_RESULT_TYPE)
        .with_metadata("task_id", task_id)
        .with_metadata("origin_channel", req.origin_channel.clone())
        .with_metadata("origin_chat_id", req.origin_chat_id.clone())
        .with_metadata("origin_sender_id", req.origin_sender_id.clone())
        .with_metadata("label", req.label.clone())
        .with_metadata("status", status);

        if let Err(e) = self.inner.bus.publish_inbound(msg).await {
            error!("Failed to announce subagent [{}] result: {}", task_id, e);
        } else {
            debug!(
                "Subagent [{}] announced result to {}:{}",
                task_id, req.origin_channel, req.origin_chat_id
            );
        }
    }

    async fn run_workflow_steps(
        &self,
        ctx: &RequestContext,
        steps: Vec<(String, SubagentTaskRequest)>,
        mode: WorkflowMode,
    ) -> Vec<Result<String>> {
        match mode {
            WorkflowMode::Sequential => {
                let mut outcomes = Vec::with_capacity(steps.len());
                for (step_id, req) in &steps {
                    if ctx.is_cancelled() {
                        outcomes.push(Err(Error::Cancelled(format!(
                            "workflow cancelled before {} started",
                            step_id
                        ))));
                        continue;
                    }
                    outcomes.push(self.execute_with_policy(ctx, step_id, req).await);
                }
                outcomes
            }
            WorkflowMode::Parallel => {
                let count = steps.len();
                let mut set = JoinSet::new();
                for (index, (step_id, req)) in steps.into_iter().enumerate() {
                    let manager = self.clone();
                    let ctx = ctx.clone();
                    set.spawn(async move {
                        (index, manager.execute_with_policy(&ctx, &step_id, &req).await)
                    });
                }

                let mut outcomes: Vec<Option<Result<String>>> = (0..count).map(|_| None).collect();
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok((index, result)) => outcomes[index] = Some(result),
                        Err(e) => error!("Workflow step task failed: {}", e),
                    }
                }
                outcomes
                    .into_iter()
                    .map(|o| o.unwrap_or_else(|| Err(Error::Internal("step did not complete".to_string()))))
                    .collect()
            }
        }
    }
}

/// Render the workflow summary reported to the caller
fn format_summary(
    workflow_id: &str,
    wf: &NormalizedWorkflow,
    steps: &[(String, SubagentTaskRequest)],
    outcomes: &[Result<String>],
) -> String {
    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    let failed = outcomes.len() - succeeded;

    let mut summary = format!(
        "Workflow {} ({}): {}\ntotal={}, succeeded={}, failed={}",
        workflow_id,
        wf.mode,
        wf.goal,
        outcomes.len(),
        succeeded,
        failed
    );
    for (k, ((step_id, req), outcome)) in steps.iter().zip(outcomes).enumerate() {
        match outcome {
            Ok(output) => summary.push_str(&format!(
                "\n\n[{}] {} ({}) ok\n{}",
                k + 1,
                req.task,
                step_id,
                output
            )),
            Err(e) => summary.push_str(&format!(
                "\n\n[{}] {} ({}) failed\nError: {}",
                k + 1,
                req.task,
                step_id,
                e
            )),
        }
    }
    summary
}

#[async_trait]
impl Delegator for SubagentManager {
    async fn spawn(&self, ctx: &RequestContext, req: SubagentTaskRequest) -> Result<String> {
        let req = req.normalize()?;
        self.check_depth(ctx)?;
        let task_id = self.next_task_id();

        // Background work outlives the spawning turn, so it follows the manager's token.
        let task_ctx = RequestContext {
            cancel: self.inner.shutdown.child_token(),
            request_id: req.request_id.clone(),
            depth: ctx.depth,
        };

        info!("Spawned subagent [{}]: {}", task_id, req.label);
        self.inner.running.fetch_add(1, Ordering::SeqCst);
        let manager = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let result = manager.execute_with_policy(&task_ctx, &id, &req).await;
            manager.publish_result(&id, &req, result).await;
            manager.inner.running.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(task_id)
    }

    async fn run_sync(&self, ctx: &RequestContext, req: SubagentTaskRequest) -> Result<String> {
        let req = req.normalize()?;
        self.check_depth(ctx)?;
        let task_id = self.next_task_id();
        info!("Running subagent [{}] inline: {}", task_id, req.label);
        self.execute_with_policy(ctx, &task_id, &req).await
    }

    async fn run_workflow(&self, ctx: &RequestContext, req: WorkflowRequest) -> Result<String> {
        let wf = req.normalize()?;
        self.check_depth(ctx)?;
        let workflow_id = self.next_task_id();
        info!(
            "Running workflow [{}] with {} {} subtask(s): {}",
            workflow_id,
            wf.subtasks.len(),
            wf.mode,
            truncate_chars(&wf.goal, 80)
        );

        let steps: Vec<(String, SubagentTaskRequest)> = wf
            .subtasks
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let req = SubagentTaskRequest::new(task.clone())
                    .with_label(format!("{} #{}", wf.label, i + 1))
                    .with_origin(
                        wf.origin_channel.clone(),
                        wf.origin_chat_id.clone(),
                        wf.origin_sender_id.clone(),
                    )
                    .with_request_id(wf.request_id.clone());
                (format!("{}-step-{}", workflow_id, i + 1), req)
            })
            .collect();

        let outcomes = self.run_workflow_steps(ctx, steps.clone(), wf.mode).await;
        Ok(format_summary(&workflow_id, &wf, &steps, &outcomes))
    }
}
