//! Channel manager: adapter registry and outbound delivery

use crate::base::{ChannelHandler, ChannelHandlerPtr, Result};
use crate::delivery::{sleep_or_cancel, DedupTracker, DeliveryOutcome, DeliveryPolicy, RateLimiter};
use skiff_core::bus::{OutboundMessage, OutboundReceiver};
use skiff_core::config::DeliveryConfig;
use skiff_core::metrics::with_recorder;
use skiff_core::{AdmissionGate, MetricsRecorderPtr};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ManagerInner {
    handlers: RwLock<HashMap<String, ChannelHandlerPtr>>,
    policy: DeliveryPolicy,
    gate: AdmissionGate,
    dedup: DedupTracker,
    rate: RateLimiter,
    metrics: Option<MetricsRecorderPtr>,
}

/// Registry of channel handlers and the outbound delivery pipeline.
///
/// Cloning is cheap; clones share handlers, the send gate, dedup state and
/// rate slots.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

impl ChannelManager {
    /// Create a new channel manager
    pub fn new(config: &DeliveryConfig) -> Self {
        Self::with_policy(DeliveryPolicy::from_config(config), None)
    }

    pub fn with_policy(policy: DeliveryPolicy, metrics: Option<MetricsRecorderPtr>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                handlers: RwLock::new(HashMap::new()),
                gate: AdmissionGate::new(policy.max_concurrent_sends),
                dedup: DedupTracker::new(policy.dedup_window),
                rate: RateLimiter::new(policy.rate_per_second),
                policy,
                metrics,
            }),
        }
    }

    /// Same configuration with a metrics recorder attached
    pub fn with_metrics(config: &DeliveryConfig, metrics: MetricsRecorderPtr) -> Self {
        Self::with_policy(DeliveryPolicy::from_config(config), Some(metrics))
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.inner.policy
    }

    /// Register a handler under its own name, replacing any previous one
    pub async fn register(&self, handler: ChannelHandlerPtr) {
        let name = handler.read().await.name().to_string();
        let mut handlers = self.inner.handlers.write().await;
        if handlers.insert(name.clone(), handler).is_some() {
            warn!("Replaced existing {} channel handler", name);
        } else {
            info!("{} channel registered", name);
        }
    }

    /// Start all channel handlers
    pub async fn start_all(&self) -> Result<()> {
        let handlers = self.inner.handlers.read().await;

        for (name, handler) in handlers.iter() {
            info!("Starting {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.start().await {
                error!("Failed to start {} channel: {}", name, e);
            }
        }

        Ok(())
    }

    /// Stop all channel handlers
    pub async fn stop_all(&self) -> Result<()> {
        let handlers = self.inner.handlers.read().await;

        for (name, handler) in handlers.iter() {
            info!("Stopping {} channel...", name);
            let mut handler = handler.write().await;
            if let Err(e) = handler.stop().await {
                error!("Failed to stop {} channel: {}", name, e);
            }
        }

        Ok(())
    }

    /// Get a channel handler by name
    pub async fn get_handler(&self, name: &str) -> Option<ChannelHandlerPtr> {
        self.inner.handlers.read().await.get(name).cloned()
    }

    /// Check if a channel is running
    pub async fn is_channel_running(&self, name: &str) -> bool {
        match self.get_handler(name).await {
            Some(handler) => handler.read().await.is_running(),
            None => false,
        }
    }

    /// Get list of registered channels
    pub async fn list_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drain the outbound queue until it closes or `cancel` fires.
    ///
    /// Every message is delivered on its own task; in-flight deliveries are
    /// awaited before returning.
    pub async fn route_outbound(&self, mut receiver: OutboundReceiver, cancel: CancellationToken) {
        info!("Outbound router started");
        let mut inflight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Outbound router cancelled");
                    break;
                }
                msg = receiver.recv() => match msg {
                    Ok(msg) => {
                        let manager = self.clone();
                        let token = cancel.clone();
                        inflight.spawn(async move { manager.deliver(msg, &token).await });
                    }
                    Err(_) => {
                        debug!("Outbound queue closed");
                        break;
                    }
                },
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Delivery task failed: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = inflight.join_next().await {
            if let Err(e) = joined {
                error!("Delivery task failed: {}", e);
            }
        }
        info!("Outbound router stopped");
    }

    /// Deliver one message under the concurrency cap, rate limit, dedup and retry policy.
    ///
    /// The per-channel rate slot is waited for before the global send slot is
    /// taken, and the send slot is held only around the send itself.
    pub async fn deliver(&self, msg: OutboundMessage, cancel: &CancellationToken) -> DeliveryOutcome {
        let inner = &self.inner;
        let metrics = &inner.metrics;
        let channel = msg.channel.as_str();

        let Some(handler) = self.get_handler(channel).await else {
            warn!(
                "Dropping message for unknown channel {} (request {})",
                channel, msg.request_id
            );
            with_recorder(metrics, |m| m.record_send_failure(channel, "unknown channel"));
            return DeliveryOutcome::UnknownChannel;
        };

        let Some(claim) = inner.dedup.claim(&msg.request_id) else {
            debug!(
                "Suppressing duplicate delivery of {} to {}",
                msg.request_id, channel
            );
            with_recorder(metrics, |m| {
                m.record_duplicate_suppressed(channel, &msg.request_id)
            });
            return DeliveryOutcome::Duplicate;
        };

        let max_attempts = inner.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            // Rate waits happen outside the gate so a throttled channel holds no send slot.
            if inner.rate.wait(channel, cancel).await.is_err() {
                return DeliveryOutcome::Cancelled;
            }
            let permit = match inner.gate.acquire(cancel).await {
                Ok(permit) => permit,
                Err(_) => return DeliveryOutcome::Cancelled,
            };

            with_recorder(metrics, |m| m.record_send_attempt(channel, attempt));
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return DeliveryOutcome::Cancelled,
                sent = async {
                    let handler = handler.read().await;
                    handler.send(&msg).await
                } => sent,
            };
            drop(permit);

            match sent {
                Ok(()) => {
                    claim.delivered();
                    debug!(
                        "Delivered {} to {}:{} after {} attempt(s)",
                        msg.request_id, channel, msg.chat_id, attempt
                    );
                    with_recorder(metrics, |m| m.record_send_success(channel, attempt));
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        let delay = inner.policy.backoff(attempt);
                        warn!(
                            "Send to {} failed (attempt {}/{}): {}; retrying in {:?}",
                            channel, attempt, max_attempts, last_error, delay
                        );
                        if sleep_or_cancel(delay, cancel).await.is_err() {
                            return DeliveryOutcome::Cancelled;
                        }
                    }
                }
            }
        }

        error!(
            "Giving up on {} to {} after {} attempts: {}",
            msg.request_id, channel, max_attempts, last_error
        );
        with_recorder(metrics, |m| m.record_send_failure(channel, &last_error));
        DeliveryOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new(&DeliveryConfig::default())
    }
}
