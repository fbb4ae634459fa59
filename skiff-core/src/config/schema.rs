//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for skiff
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent configuration
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Model provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Message bus configuration
    #[serde(default)]
    pub bus: BusConfig,
    /// Subagent execution limits
    #[serde(default)]
    pub subagents: SubagentConfig,
    /// Outbound delivery policy
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Tools configuration
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Channel configuration
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    /// Default agent settings
    #[serde(default)]
    pub defaults: AgentDefaults,
}

/// Default agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Default model
    pub model: String,
    /// Maximum tokens
    pub max_tokens: u32,
    /// Temperature
    pub temperature: f32,
    /// Maximum tool iterations
    pub max_tool_iterations: u32,
    /// Messages kept per session; older ones are dropped
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Seconds a session may sit idle before it is evicted (0 = never)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_history_limit() -> usize {
    50
}
fn default_session_idle_secs() -> u64 {
    86_400
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_tool_iterations: 20,
            history_limit: default_history_limit(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl AgentDefaults {
    /// Idle eviction threshold, `None` when disabled
    pub fn session_idle(&self) -> Option<Duration> {
        (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
    }
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub extra_headers: Option<HashMap<String, String>>,
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each of the inbound and outbound queues
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

fn default_bus_capacity() -> usize {
    crate::bus::DEFAULT_BUS_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

/// Subagent execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    /// Delegated attempts allowed to run at once
    #[serde(default = "default_subagent_concurrency")]
    pub max_concurrency: usize,
    /// Extra attempts after the first failure
    #[serde(default = "default_subagent_retry")]
    pub retry: u32,
    /// Per-task timeout in seconds
    #[serde(default = "default_subagent_timeout")]
    pub timeout_secs: u64,
    /// Maximum delegation nesting (0 = unlimited)
    #[serde(default = "default_subagent_depth")]
    pub max_depth: u32,
}

fn default_subagent_concurrency() -> usize {
    3
}
fn default_subagent_retry() -> u32 {
    1
}
fn default_subagent_timeout() -> u64 {
    300
}
fn default_subagent_depth() -> u32 {
    3
}

impl SubagentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_subagent_concurrency(),
            retry: default_subagent_retry(),
            timeout_secs: default_subagent_timeout(),
            max_depth: default_subagent_depth(),
        }
    }
}

/// Outbound delivery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Adapter sends in flight across all channels
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Total attempts per message
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_backoff_ms")]
    pub retry_base_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,
    /// How long a delivered request id suppresses duplicates
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    /// Sends per second per channel (0 = unlimited)
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: f64,
}

fn default_max_concurrent_sends() -> usize {
    8
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_backoff_ms() -> u64 {
    200
}
fn default_retry_max_backoff_ms() -> u64 {
    2000
}
fn default_dedup_window_secs() -> u64 {
    600
}
fn default_rate_limit_per_second() -> f64 {
    5.0
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_backoff_ms: default_retry_base_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            dedup_window_secs: default_dedup_window_secs(),
            rate_limit_per_second: default_rate_limit_per_second(),
        }
    }
}

/// Tools configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-call timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_tool_timeout() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
        }
    }
}

/// Channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Console (stdin/stdout) channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_from: Vec::new(),
        }
    }
}
