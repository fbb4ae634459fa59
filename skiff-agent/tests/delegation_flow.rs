//! Delegation through the running agent loop

use async_trait::async_trait;
use serde_json::{json, Value};
use skiff_agent::{AgentLoop, AgentSettings, SubagentSettings};
use skiff_core::bus::{InboundMessage, MessageBus};
use skiff_providers::{LLMProvider, LLMResponse, Message, ProviderResult, ToolCallRequest};
use skiff_tools::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Answers by rule:
/// - after a tool result: `result: <tool output>`
/// - `<tool>: <task>` from the user: a call to that tool
/// - anything else: `echo: <content>`
struct RuleProvider;

#[async_trait]
impl LLMProvider for RuleProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        _tools: Option<Vec<Value>>,
        _model: Option<String>,
        _max_tokens: u32,
        _temperature: f32,
    ) -> ProviderResult<LLMResponse> {
        let last = messages.last().cloned().unwrap_or_else(|| Message::user(""));
        if last.role == "tool" {
            return Ok(LLMResponse::text(format!("result: {}", last.content)));
        }
        for tool in ["spawn", "delegate"] {
            if let Some(task) = last.content.strip_prefix(&format!("{}:", tool)) {
                return Ok(LLMResponse::with_tool_calls(vec![ToolCallRequest::new(
                    "call_1",
                    tool,
                    json!({"task": task.trim()}),
                )]));
            }
        }
        Ok(LLMResponse::text(format!("echo: {}", last.content)))
    }

    fn get_default_model(&self) -> String {
        "rules".to_string()
    }
}

fn start_agent() -> (Arc<AgentLoop>, MessageBus) {
    let bus = MessageBus::new(32);
    let agent = AgentLoop::with_tools(
        bus.clone(),
        Arc::new(RuleProvider),
        AgentSettings::default(),
        SubagentSettings::default(),
        ToolRegistry::new(),
        None,
    );
    (agent, bus)
}

#[tokio::test]
async fn test_spawned_result_reaches_origin_chat() {
    let (agent, bus) = start_agent();
    let mut outbound = bus.take_outbound_receiver().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(agent.clone().run(cancel.clone()));

    bus.publish_inbound(
        InboundMessage::new("console", "user", "local", "spawn: count files")
            .with_request_id("req-1"),
    )
    .await
    .unwrap();

    let ack = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ack.channel, "console");
    assert_eq!(ack.request_id, "req-1");
    assert!(ack.content.starts_with("result: Subagent [count files] started (id: subagent-1)"));

    let relayed = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(relayed.channel, "console");
    assert_eq!(relayed.chat_id, "local");
    assert_eq!(relayed.request_id, "req-1:subagent-1");
    assert_eq!(
        relayed.content,
        "[Subagent 'count files' completed]\n\necho: count files"
    );

    cancel.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(agent.subagents().running_count(), 0);
}

#[tokio::test]
async fn test_delegate_answers_inline() {
    let (agent, _bus) = start_agent();

    let reply = agent
        .process_direct("delegate: summarize notes", "cli", "direct")
        .await
        .unwrap();
    assert_eq!(reply, "result: echo: summarize notes");

    // The delegated conversation never lands in the user's session.
    let keys = agent.sessions().keys();
    assert_eq!(keys, vec!["cli:direct".to_string()]);
}

#[tokio::test]
async fn test_loop_stops_when_bus_closes() {
    let (agent, bus) = start_agent();
    let handle = tokio::spawn(agent.run(CancellationToken::new()));
    bus.close();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop after the bus closes")
        .unwrap()
        .unwrap();
}
