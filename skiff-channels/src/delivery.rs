//! Outbound delivery policy state: dedup tracking, per-channel rate slots and backoff

use parking_lot::Mutex;
use skiff_core::config::DeliveryConfig;
use skiff_core::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Resolved delivery limits
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub max_concurrent_sends: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub dedup_window: Duration,
    /// Sends per second per channel; `None` disables rate limiting
    pub rate_per_second: Option<f64>,
}

impl DeliveryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_concurrent_sends: config.max_concurrent_sends.max(1),
            max_attempts: config.retry_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.retry_base_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
            dedup_window: Duration::from_secs(config.dedup_window_secs),
            rate_per_second: Some(config.rate_limit_per_second)
                .filter(|rate| rate.is_finite() && *rate > 0.0),
        }
    }

    /// Wait after the failed `attempt` (1-based): `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

/// Final state of one outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The adapter accepted the message
    Delivered { attempts: u32 },
    /// The request id was delivered recently or is being delivered right now
    Duplicate,
    /// Every attempt failed
    Failed { attempts: u32, error: String },
    /// No adapter is registered under the message's channel
    UnknownChannel,
    /// The caller's token fired before delivery finished
    Cancelled,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone, Copy)]
enum DedupState {
    InFlight,
    Delivered(Instant),
}

/// Request ids that are in flight or were delivered within the window
pub struct DedupTracker {
    window: Duration,
    entries: Mutex<HashMap<String, DedupState>>,
}

impl DedupTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claim `request_id` for delivery.
    ///
    /// Returns `None` when the id is already in flight or was delivered
    /// within the window. Empty ids are never deduplicated. The claim is
    /// forgotten on drop unless [`DedupClaim::delivered`] was called.
    pub fn claim(&self, request_id: &str) -> Option<DedupClaim<'_>> {
        if request_id.is_empty() {
            return Some(DedupClaim {
                tracker: self,
                request_id: None,
            });
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let window = self.window;
        entries.retain(|_, state| match state {
            DedupState::InFlight => true,
            DedupState::Delivered(at) => now.duration_since(*at) < window,
        });

        if entries.contains_key(request_id) {
            return None;
        }
        entries.insert(request_id.to_string(), DedupState::InFlight);
        Some(DedupClaim {
            tracker: self,
            request_id: Some(request_id.to_string()),
        })
    }

    /// Number of tracked ids, expired ones included until the next sweep
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-flight dedup entry
pub struct DedupClaim<'a> {
    tracker: &'a DedupTracker,
    request_id: Option<String>,
}

impl DedupClaim<'_> {
    /// Record a successful delivery so the id is suppressed for the window
    pub fn delivered(mut self) {
        if let Some(id) = self.request_id.take() {
            self.tracker
                .entries
                .lock()
                .insert(id, DedupState::Delivered(Instant::now()));
        }
    }
}

impl Drop for DedupClaim<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.request_id.take() {
            self.tracker.entries.lock().remove(&id);
        }
    }
}

/// Per-channel start spacing of `1 / rate`
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(rate_per_second: Option<f64>) -> Self {
        Self {
            interval: rate_per_second.map(|rate| Duration::from_secs_f64(1.0 / rate)),
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next start slot for `channel`
    fn reserve(&self, channel: &str) -> Option<Instant> {
        let interval = self.interval?;
        let now = Instant::now();
        let mut slots = self.next_slot.lock();
        let slot = slots
            .get(channel)
            .copied()
            .filter(|next| *next > now)
            .unwrap_or(now);
        slots.insert(channel.to_string(), slot + interval);
        Some(slot)
    }

    /// Wait until `channel` may start another send
    pub async fn wait(&self, channel: &str, cancel: &CancellationToken) -> Result<()> {
        let Some(slot) = self.reserve(channel) else {
            return Ok(());
        };
        if slot <= Instant::now() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled("rate limit wait cancelled".to_string())),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled("backoff cancelled".to_string())),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
