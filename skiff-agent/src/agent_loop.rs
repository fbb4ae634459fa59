//! Agent loop: the core processing engine

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skiff_core::bus::{InboundMessage, MessageBus, OutboundMessage, SUBAGENT_RESULT_TYPE};
use skiff_core::config::Config;
use skiff_core::delegation::Delegator;
use skiff_core::metrics::with_recorder;
use skiff_core::session::SessionManager;
use skiff_core::utils::truncate_chars;
use skiff_core::{Error, MetricsRecorderPtr, RequestContext, Result};
use skiff_providers::{LLMProvider, ToolCallRequest};
use skiff_tools::{DelegateTool, SpawnTool, ToolContext, ToolRegistry, WorkflowTool};

use crate::context::ContextBuilder;
use crate::processor::Processor;
use crate::subagent::{SubagentManager, SubagentSettings, SUBAGENT_SESSION_PREFIX};

const NO_RESPONSE: &str = "I've completed processing but have no response to give.";

/// Model and tool-loop settings for one agent
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Model name; empty means the provider default
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_iterations: u32,
    /// Per tool call
    pub tool_timeout: Duration,
    /// Messages kept and replayed per session
    pub history_limit: usize,
    /// Idle sessions older than this are evicted
    pub session_idle: Option<Duration>,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        let defaults = &config.agents.defaults;
        Self {
            model: defaults.model.clone(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            max_iterations: defaults.max_tool_iterations,
            tool_timeout: Duration::from_secs(config.tools.timeout_secs),
            history_limit: defaults.history_limit,
            session_idle: defaults.session_idle(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The agent loop is the core processing engine
pub struct AgentLoop {
    bus: MessageBus,
    provider: Arc<dyn LLMProvider>,
    settings: AgentSettings,
    context: ContextBuilder,
    sessions: SessionManager,
    tools: Arc<ToolRegistry>,
    subagents: SubagentManager,
    metrics: Option<MetricsRecorderPtr>,
}

impl AgentLoop {
    /// Create an agent loop from configuration with the delegation tools registered
    pub fn new(bus: MessageBus, provider: Arc<dyn LLMProvider>, config: &Config) -> Arc<Self> {
        Self::with_tools(
            bus,
            provider,
            AgentSettings::from_config(config),
            SubagentSettings::from_config(&config.subagents),
            ToolRegistry::new(),
            None,
        )
    }

    /// Create an agent loop around an existing registry.
    ///
    /// The delegation tools are added to `tools`, and the subagent manager is
    /// bound back to the returned loop so delegated tasks re-enter it.
    pub fn with_tools(
        bus: MessageBus,
        provider: Arc<dyn LLMProvider>,
        mut settings: AgentSettings,
        subagent_settings: SubagentSettings,
        mut tools: ToolRegistry,
        metrics: Option<MetricsRecorderPtr>,
    ) -> Arc<Self> {
        if settings.model.trim().is_empty() {
            settings.model = provider.get_default_model();
        }

        let subagents = SubagentManager::new(bus.clone(), subagent_settings, metrics.clone());
        let delegator: Arc<dyn Delegator> = Arc::new(subagents.clone());
        tools.register(Arc::new(SpawnTool::new(delegator.clone())));
        tools.register(Arc::new(DelegateTool::new(delegator.clone())));
        tools.register(Arc::new(WorkflowTool::new(delegator)));

        let sessions = SessionManager::with_limits(settings.history_limit, settings.session_idle);
        let agent = Arc::new(Self {
            bus,
            provider,
            settings,
            context: ContextBuilder::new(),
            sessions,
            tools: Arc::new(tools),
            subagents,
            metrics,
        });

        let processor: Arc<dyn Processor> = agent.clone();
        agent.subagents.bind_processor(Arc::downgrade(&processor));
        agent
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn subagents(&self) -> &SubagentManager {
        &self.subagents
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Names of the registered tools
    pub fn tool_names(&self) -> Vec<String> {
        let mut names = self.tools.tool_names();
        names.sort();
        names
    }

    /// Run the agent loop, processing messages from the bus until it closes
    /// or `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let Some(mut inbound) = self.bus.take_inbound_receiver() else {
            error!("Failed to take inbound receiver");
            return Err(Error::Internal("inbound receiver already taken".to_string()));
        };
        info!("Agent loop started");

        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Agent loop cancelled");
                    break;
                }
                received = inbound.recv() => match received {
                    Ok(msg) => msg,
                    Err(_) => {
                        info!("Message bus closed, stopping agent loop");
                        break;
                    }
                },
            };

            debug!("Received message from {}:{}", msg.channel, msg.chat_id);
            match self.process_inbound_message(msg, &cancel).await {
                Ok(Some(response)) => {
                    if let Err(e) = self.bus.publish_outbound(response).await {
                        error!("Failed to publish response: {}", e);
                    }
                }
                Ok(None) => debug!("No response needed"),
                Err(e) if e.is_cancellation() => debug!("Message processing cancelled: {}", e),
                Err(e) => error!("Error processing message: {}", e),
            }
        }

        self.shutdown();
        info!("Agent loop stopped");
        Ok(())
    }

    /// Stop background subagents
    pub fn shutdown(&self) {
        self.subagents.shutdown();
    }

    /// Process a single inbound message into at most one reply
    pub async fn process_inbound_message(
        &self,
        msg: InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<Option<OutboundMessage>> {
        if msg.is_system() {
            return Ok(self.relay_system_message(&msg));
        }

        info!(
            "Processing message from {}:{}: {} (model: {})",
            msg.channel,
            msg.sender_id,
            truncate_chars(&msg.content, 80),
            self.settings.model
        );

        let ctx = RequestContext::with_token(cancel.child_token(), msg.request_id.clone());
        let session_key = msg.session_key();
        let content = self
            .run_turn(
                &ctx,
                &msg.channel,
                &msg.chat_id,
                &msg.sender_id,
                &session_key,
                &msg.content,
            )
            .await?;

        info!(
            "Response to {}:{}: {}",
            msg.channel,
            msg.sender_id,
            truncate_chars(&content, 120)
        );

        let mut reply = OutboundMessage::new(msg.channel, msg.chat_id, content)
            .with_request_id(msg.request_id);
        if let Some(message_id) = msg.metadata.get("message_id").and_then(Value::as_str) {
            reply = reply.reply_to(message_id);
        }
        Ok(Some(reply))
    }

    /// Translate a control-plane message into a reply for its origin.
    ///
    /// Subagent results go straight to the originating conversation; other
    /// system messages are dropped.
    fn relay_system_message(&self, msg: &InboundMessage) -> Option<OutboundMessage> {
        if msg.message_type() != Some(SUBAGENT_RESULT_TYPE) {
            warn!(
                "Dropping system message of unknown type {:?} from {}",
                msg.message_type(),
                msg.sender_id
            );
            return None;
        }

        let split = msg.chat_id.split_once(':');
        let origin_channel = msg
            .metadata_str("origin_channel")
            .or(split.map(|(channel, _)| channel))
            .filter(|s| !s.is_empty());
        let origin_chat_id = msg
            .metadata_str("origin_chat_id")
            .or(split.map(|(_, chat)| chat))
            .filter(|s| !s.is_empty());
        let (Some(channel), Some(chat_id)) = (origin_channel, origin_chat_id) else {
            warn!("Dropping subagent result without origin: {}", msg.chat_id);
            return None;
        };

        let task_id = msg.metadata_str("task_id").unwrap_or("unknown");
        let label = msg.metadata_str("label").unwrap_or(task_id);
        let status = msg.metadata_str("status").unwrap_or("ok");
        let verb = if status == "ok" { "completed" } else { "failed" };

        info!("Relaying subagent [{}] result to {}:{}", task_id, channel, chat_id);
        Some(
            OutboundMessage::new(
                channel,
                chat_id,
                format!("[Subagent '{}' {}]\n\n{}", label, verb, msg.content),
            )
            .with_request_id(format!("{}:{}", msg.request_id, task_id))
            .with_metadata("task_id", task_id)
            .with_metadata("status", status),
        )
    }

    /// Process a message directly (for CLI or testing)
    pub async fn process_direct(
        &self,
        content: impl Into<String>,
        channel: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<String> {
        let msg = InboundMessage::new(channel, "user", chat_id, content);
        let response = self
            .process_inbound_message(msg, &CancellationToken::new())
            .await?;
        Ok(response.map(|r| r.content).unwrap_or_default())
    }

    /// One conversational turn: model calls interleaved with tool fan-outs
    async fn run_turn(
        &self,
        ctx: &RequestContext,
        channel: &str,
        chat_id: &str,
        sender_id: &str,
        session_key: &str,
        content: &str,
    ) -> Result<String> {
        let mut messages = if session_key.starts_with(SUBAGENT_SESSION_PREFIX) {
            self.context.build_subagent_messages(content)
        } else {
            let history = self.sessions.history(session_key, self.settings.history_limit);
            self.context
                .build_messages(history, content, Some(channel), Some(chat_id))
        };
        let tool_ctx = ToolContext::new(channel, chat_id, sender_id, session_key, ctx.clone());

        let mut final_content = None;
        for iteration in 1..=self.settings.max_iterations {
            debug!(
                "Agent iteration {}/{} for {}",
                iteration, self.settings.max_iterations, session_key
            );

            let tool_defs = self.tools.get_definitions();
            let chat = self.provider.chat(
                messages.clone(),
                if tool_defs.is_empty() { None } else { Some(tool_defs) },
                Some(self.settings.model.clone()),
                self.settings.max_tokens,
                self.settings.temperature,
            );
            let response = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Err(Error::Cancelled(format!("turn for {} cancelled", session_key)));
                }
                response = chat => response?,
            };

            if !response.has_tool_calls() {
                final_content = response.content;
                break;
            }

            info!("LLM requested {} tool calls", response.tool_calls.len());
            self.context.add_assistant_message(
                &mut messages,
                response.content.clone(),
                response.tool_calls.clone(),
            );
            let results = self.execute_tool_calls(&tool_ctx, &response.tool_calls).await?;
            for (call, result) in response.tool_calls.iter().zip(results) {
                self.context.add_tool_result(&mut messages, &call.id, result);
            }
        }

        let final_content = final_content.unwrap_or_else(|| NO_RESPONSE.to_string());
        self.sessions
            .record_exchange(session_key, content, &final_content);
        Ok(final_content)
    }

    /// Run every call of one model response concurrently.
    ///
    /// Results come back in call order. Failures become `Error: ...` text; only
    /// cancellation of the turn fails the whole batch.
    async fn execute_tool_calls(
        &self,
        tool_ctx: &ToolContext,
        calls: &[ToolCallRequest],
    ) -> Result<Vec<String>> {
        let mut set = JoinSet::new();
        for (index, call) in calls.iter().enumerate() {
            info!(
                "Tool call: {}({})",
                call.name,
                truncate_chars(&call.arguments.to_string(), 200)
            );

            let tools = self.tools.clone();
            let ctx = tool_ctx.with_request(tool_ctx.request.child());
            let name = call.name.clone();
            let args = call.arguments.clone();
            let timeout = self.settings.tool_timeout;
            let metrics = self.metrics.clone();
            set.spawn(async move {
                let started = Instant::now();
                let result =
                    match tokio::time::timeout(timeout, tools.execute(&ctx, &name, args)).await {
                        Ok(Ok(output)) => Ok(output),
                        Ok(Err(e)) => Err(format!("Error: {}", e)),
                        Err(_) => {
                            ctx.request.cancel.cancel();
                            Err(format!("Error: tool '{}' timed out after {:?}", name, timeout))
                        }
                    };
                let elapsed = started.elapsed();
                with_recorder(&metrics, |m| {
                    m.record_tool_execution(&name, elapsed, result.is_err())
                });
                match result {
                    Ok(output) => {
                        debug!("Tool {} finished in {:?}", name, elapsed);
                        (index, output)
                    }
                    Err(text) => {
                        warn!("Tool {} failed after {:?}: {}", name, elapsed, text);
                        (index, text)
                    }
                }
            });
        }

        let mut results: Vec<Option<String>> = vec![None; calls.len()];
        loop {
            tokio::select! {
                biased;
                _ = tool_ctx.request.cancel.cancelled() => {
                    set.abort_all();
                    return Err(Error::Cancelled("tool calls cancelled".to_string()));
                }
                joined = set.join_next() => match joined {
                    Some(Ok((index, output))) => results[index] = Some(output),
                    Some(Err(e)) => error!("Tool task failed: {}", e),
                    None => break,
                },
            }
        }

        Ok(results
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| format!("Error: tool '{}' failed unexpectedly", call.name))
            })
            .collect())
    }
}

#[async_trait]
impl Processor for AgentLoop {
    async fn process_for_channel_with_session(
        &self,
        ctx: &RequestContext,
        channel: &str,
        chat_id: &str,
        sender_id: &str,
        session_id: &str,
        content: &str,
    ) -> Result<String> {
        self.run_turn(ctx, channel, chat_id, sender_id, session_id, content)
            .await
    }

    fn release_session(&self, session_id: &str) {
        if self.sessions.remove(session_id) {
            debug!("Released session {}", session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use skiff_providers::{LLMResponse, Message, ProviderResult};
    use skiff_tools::Tool;
    use std::collections::VecDeque;

    /// Replays queued responses, then answers "done"
    #[derive(Default)]
    struct ScriptedProvider {
        responses: Mutex<VecDeque<LLMResponse>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<LLMResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Option<Vec<Value>>,
            _model: Option<String>,
            _max_tokens: u32,
            _temperature: f32,
        ) -> ProviderResult<LLMResponse> {
            self.requests.lock().push(messages);
            Ok(self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| LLMResponse::text("done")))
        }

        fn get_default_model(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Sleeps `ms` then echoes `out`, or fails when `out` is "boom"
    struct SleepTool;

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleep then echo"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "ms": {"type": "integer"},
                    "out": {"type": "string"}
                },
                "required": ["ms", "out"]
            })
        }

        async fn execute(&self, _ctx: &ToolContext, args: Value) -> skiff_tools::base::Result<String> {
            let ms = args["ms"].as_u64().unwrap_or(0);
            let out = args["out"].as_str().unwrap_or_default().to_string();
            tokio::time::sleep(Duration::from_millis(ms)).await;
            if out == "boom" {
                return Err(skiff_tools::ToolError::ExecutionFailed("boom".to_string()));
            }
            Ok(out)
        }
    }

    fn sleep_call(id: &str, ms: u64, out: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "sleep", json!({"ms": ms, "out": out}))
    }

    fn agent(provider: Arc<ScriptedProvider>, tool_timeout: Duration) -> (Arc<AgentLoop>, MessageBus) {
        let bus = MessageBus::new(16);
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SleepTool));
        let settings = AgentSettings {
            tool_timeout,
            ..AgentSettings::default()
        };
        let agent = AgentLoop::with_tools(
            bus.clone(),
            provider,
            settings,
            SubagentSettings::default(),
            tools,
            None,
        );
        (agent, bus)
    }

    fn tool_ctx(request: RequestContext) -> ToolContext {
        ToolContext::new("cli", "direct", "user", "cli:direct", request)
    }

    #[tokio::test]
    async fn test_delegation_tools_registered() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(5));
        assert_eq!(agent.tool_names(), vec!["delegate", "sleep", "spawn", "workflow"]);
        assert_eq!(agent.settings().max_iterations, 20);
    }

    #[tokio::test]
    async fn test_fan_out_runs_concurrently_and_keeps_order() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(5));
        let calls = vec![
            sleep_call("c1", 150, "first"),
            sleep_call("c2", 100, "second"),
            sleep_call("c3", 50, "third"),
        ];

        let started = Instant::now();
        let results = agent
            .execute_tool_calls(&tool_ctx(RequestContext::default()), &calls)
            .await
            .unwrap();

        assert_eq!(results, vec!["first", "second", "third"]);
        assert!(started.elapsed() < Duration::from_millis(290));
    }

    #[tokio::test]
    async fn test_fan_out_turns_errors_into_text() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(5));
        let calls = vec![
            sleep_call("c1", 0, "boom"),
            ToolCallRequest::new("c2", "missing", json!({})),
            sleep_call("c3", 0, "fine"),
        ];

        let results = agent
            .execute_tool_calls(&tool_ctx(RequestContext::default()), &calls)
            .await
            .unwrap();

        assert_eq!(results[0], "Error: Execution failed: boom");
        assert_eq!(results[1], "Error: Tool 'missing' not found");
        assert_eq!(results[2], "fine");
    }

    #[tokio::test]
    async fn test_fan_out_times_out_slow_call() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_millis(50));
        let calls = vec![sleep_call("c1", 5_000, "late"), sleep_call("c2", 0, "quick")];

        let started = Instant::now();
        let results = agent
            .execute_tool_calls(&tool_ctx(RequestContext::default()), &calls)
            .await
            .unwrap();

        assert_eq!(results[0], "Error: tool 'sleep' timed out after 50ms");
        assert_eq!(results[1], "quick");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fan_out_cancellation_fails_turn() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(30));
        let request = RequestContext::default();
        let cancel = request.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = agent
            .execute_tool_calls(&tool_ctx(request), &[sleep_call("c1", 10_000, "never")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_turn_feeds_tool_results_back_in_order() {
        let provider = ScriptedProvider::new(vec![
            LLMResponse::with_tool_calls(vec![
                sleep_call("c1", 30, "alpha"),
                sleep_call("c2", 0, "beta"),
            ]),
            LLMResponse::text("all done"),
        ]);
        let (agent, _bus) = agent(provider.clone(), Duration::from_secs(5));

        let reply = agent.process_direct("go", "cli", "direct").await.unwrap();
        assert_eq!(reply, "all done");

        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        let tail: Vec<(&str, Option<&str>)> = second[second.len() - 2..]
            .iter()
            .map(|m| (m.content.as_str(), m.tool_call_id.as_deref()))
            .collect();
        assert_eq!(tail, vec![("alpha", Some("c1")), ("beta", Some("c2"))]);
        assert!(agent.sessions().contains("cli:direct"));
    }

    #[tokio::test]
    async fn test_relay_subagent_result_to_origin() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(5));
        let msg = InboundMessage::new("system", "subagent", "telegram:42", "42 files")
            .with_request_id("req-1")
            .with_metadata("type", SUBAGENT_RESULT_TYPE)
            .with_metadata("task_id", "subagent-1")
            .with_metadata("origin_channel", "telegram")
            .with_metadata("origin_chat_id", "42")
            .with_metadata("label", "count")
            .with_metadata("status", "ok");

        let reply = agent
            .process_inbound_message(msg, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.channel, "telegram");
        assert_eq!(reply.chat_id, "42");
        assert_eq!(reply.content, "[Subagent 'count' completed]\n\n42 files");
        assert_eq!(reply.request_id, "req-1:subagent-1");
        assert_eq!(reply.metadata["task_id"], "subagent-1");
    }

    #[tokio::test]
    async fn test_relay_falls_back_to_chat_id_origin() {
        let (agent, _bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(5));
        let msg = InboundMessage::new("system", "subagent", "console:local", "Error: boom")
            .with_metadata("type", SUBAGENT_RESULT_TYPE)
            .with_metadata("task_id", "subagent-3")
            .with_metadata("status", "Task failed: boom");

        let reply = agent.relay_system_message(&msg).unwrap();
        assert_eq!(reply.channel, "console");
        assert_eq!(reply.chat_id, "local");
        assert!(reply.content.starts_with("[Subagent 'subagent-3' failed]"));
    }

    #[tokio::test]
    async fn test_unknown_system_message_dropped() {
        let provider = ScriptedProvider::new(vec![]);
        let (agent, _bus) = agent(provider.clone(), Duration::from_secs(5));
        let msg = InboundMessage::new("system", "cron", "cli:direct", "tick")
            .with_metadata("type", "heartbeat");

        let reply = agent
            .process_inbound_message(msg, &CancellationToken::new())
            .await
            .unwrap();
        assert!(reply.is_none());
        assert!(provider.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_replies_with_request_id_and_reply_to() {
        let provider = ScriptedProvider::new(vec![LLMResponse::text("hello back")]);
        let (agent, bus) = agent(provider, Duration::from_secs(5));
        let mut outbound = bus.take_outbound_receiver().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(agent.clone().run(cancel.clone()));

        bus.publish_inbound(
            InboundMessage::new("console", "user", "local", "hello")
                .with_request_id("req-9")
                .with_metadata("message_id", "m-1"),
        )
        .await
        .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "hello back");
        assert_eq!(reply.request_id, "req-9");
        assert_eq!(reply.reply_to.as_deref(), Some("m-1"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let (agent, bus) = agent(ScriptedProvider::new(vec![]), Duration::from_secs(5));
        let _taken = bus.take_inbound_receiver();
        let err = agent.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_delegated_session_is_released() {
        let provider = ScriptedProvider::new(vec![LLMResponse::text("sub answer")]);
        let (agent, _bus) = agent(provider.clone(), Duration::from_secs(5));

        let output = agent
            .subagents()
            .run_sync(
                &RequestContext::default(),
                skiff_core::delegation::SubagentTaskRequest::new("look it up"),
            )
            .await
            .unwrap();
        assert_eq!(output, "sub answer");
        assert!(agent.sessions().keys().is_empty());

        let requests = provider.requests.lock();
        assert!(requests[0][0].content.contains("# Subagent"));
    }

    #[tokio::test]
    async fn test_session_history_stays_bounded() {
        let bus = MessageBus::new(16);
        let settings = AgentSettings {
            history_limit: 4,
            ..AgentSettings::default()
        };
        let agent = AgentLoop::with_tools(
            bus,
            ScriptedProvider::new(vec![]),
            settings,
            SubagentSettings::default(),
            ToolRegistry::new(),
            None,
        );

        for i in 0..20 {
            agent
                .process_direct(&format!("turn {}", i), "cli", "direct")
                .await
                .unwrap();
        }
        let history = agent.sessions().history("cli:direct", usize::MAX);
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "turn 18");
    }
}
