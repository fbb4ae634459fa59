//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.agents.defaults.model.trim().is_empty() {
        errors.push("agents.defaults.model must not be empty".to_string());
    }
    if config.agents.defaults.max_tokens == 0 {
        errors.push("agents.defaults.max_tokens must be > 0".to_string());
    }
    if !(0.0..=2.0).contains(&config.agents.defaults.temperature) {
        errors.push("agents.defaults.temperature must be in [0.0, 2.0]".to_string());
    }
    if config.agents.defaults.max_tool_iterations == 0 {
        errors.push("agents.defaults.max_tool_iterations must be > 0".to_string());
    }
    if config.agents.defaults.history_limit == 0 {
        errors.push("agents.defaults.history_limit must be > 0".to_string());
    }

    if config.bus.capacity == 0 {
        errors.push("bus.capacity must be > 0".to_string());
    }

    if config.subagents.max_concurrency == 0 {
        errors.push("subagents.max_concurrency must be > 0".to_string());
    }
    if config.subagents.timeout_secs == 0 {
        errors.push("subagents.timeout_secs must be > 0".to_string());
    }
    // Each nesting level holds a gate slot while its child waits for one.
    if config.subagents.max_depth as usize > config.subagents.max_concurrency {
        errors.push("subagents.max_depth must not exceed subagents.max_concurrency".to_string());
    }

    let delivery = &config.delivery;
    if delivery.max_concurrent_sends == 0 {
        errors.push("delivery.max_concurrent_sends must be > 0".to_string());
    }
    if delivery.retry_max_attempts == 0 {
        errors.push("delivery.retry_max_attempts must be > 0".to_string());
    }
    if delivery.retry_base_backoff_ms > delivery.retry_max_backoff_ms {
        errors.push(
            "delivery.retry_base_backoff_ms must not exceed delivery.retry_max_backoff_ms"
                .to_string(),
        );
    }
    if !delivery.rate_limit_per_second.is_finite() || delivery.rate_limit_per_second < 0.0 {
        errors.push("delivery.rate_limit_per_second must be >= 0".to_string());
    }

    if config.tools.timeout_secs == 0 {
        errors.push("tools.timeout_secs must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
