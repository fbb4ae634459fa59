//! Context builder for assembling prompts

use skiff_core::session::ChatMessage;
use skiff_providers::{Message, ToolCallRequest};

/// Builds the context for LLM requests
pub struct ContextBuilder {
    agent_name: String,
}

impl ContextBuilder {
    /// Create a new context builder
    pub fn new() -> Self {
        Self {
            agent_name: "skiff".to_string(),
        }
    }

    /// Build the system prompt for a user conversation
    pub fn build_system_prompt(&self) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!(
            r#"# {name}

You are {name}, a helpful AI assistant. You can hand work to subagents:
- `spawn` starts a task in the background; its result is sent to this chat when done
- `delegate` runs a task and waits for the answer
- `workflow` splits a goal into subtasks and runs them sequentially or in parallel

## Current Time
{now}

When responding to direct questions or conversations, reply directly with text.
Only delegate work that is self-contained. Always be helpful, accurate, and concise."#,
            name = self.agent_name,
        )
    }

    /// Build the focused system prompt for a delegated task
    pub fn build_subagent_prompt(&self, task: &str) -> String {
        format!(
            r#"# Subagent

You are a subagent of {name} running one delegated task.

## Your Task
{task}

## Rules
1. Stay focused: complete only the assigned task
2. Your final response is reported back to the agent that delegated it
3. Do not start conversations or take on side tasks
4. Be concise but informative

When the task is done, give a clear summary of your findings or actions."#,
            name = self.agent_name,
        )
    }

    /// Build the complete message list for an LLM call
    pub fn build_messages(
        &self,
        history: Vec<ChatMessage>,
        current_message: &str,
        channel: Option<&str>,
        chat_id: Option<&str>,
    ) -> Vec<Message> {
        let mut system_prompt = self.build_system_prompt();
        if let (Some(ch), Some(id)) = (channel, chat_id) {
            system_prompt.push_str(&format!(
                "\n\n## Current Session\nChannel: {}\nChat ID: {}",
                ch, id
            ));
        }

        let mut messages = vec![Message::system(system_prompt)];
        for msg in history {
            let message = match msg.role.as_str() {
                "user" => Message::user(&msg.content),
                "assistant" => Message::assistant(&msg.content),
                _ => continue,
            };
            messages.push(message);
        }
        messages.push(Message::user(current_message));
        messages
    }

    /// Message list for a delegated task; delegated sessions start without history
    pub fn build_subagent_messages(&self, task: &str) -> Vec<Message> {
        vec![
            Message::system(self.build_subagent_prompt(task)),
            Message::user(task),
        ]
    }

    /// Add a tool result to the message list
    pub fn add_tool_result(&self, messages: &mut Vec<Message>, tool_call_id: &str, result: String) {
        messages.push(Message::tool(result, tool_call_id));
    }

    /// Add an assistant message carrying tool calls
    pub fn add_assistant_message(
        &self,
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) {
        messages.push(Message::assistant_with_tools(
            content.unwrap_or_default(),
            tool_calls,
        ));
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
