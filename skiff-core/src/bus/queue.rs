//! Bounded async message queues

use super::events::{InboundMessage, OutboundMessage};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default capacity of each bus queue
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Consuming end of a bus queue.
///
/// `recv` yields `Err(Error::BusClosed)` once the bus has been closed and
/// every message buffered before the close has been drained.
pub struct BusReceiver<T> {
    rx: mpsc::Receiver<T>,
    closed: CancellationToken,
}

pub type InboundReceiver = BusReceiver<InboundMessage>;
pub type OutboundReceiver = BusReceiver<OutboundMessage>;

impl<T> BusReceiver<T> {
    /// Wait for the next message
    pub async fn recv(&mut self) -> Result<T> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg.ok_or(Error::BusClosed),
            _ = self.closed.cancelled() => self.rx.try_recv().map_err(|_| Error::BusClosed),
        }
    }

    /// Take a message if one is ready
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Async message bus that decouples chat channels from the agent core
///
/// Channels push messages to the inbound queue, the agent processes them and
/// pushes responses to the outbound queue. Both queues are bounded: publishers
/// wait for space.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: Arc<RwLock<Option<mpsc::Sender<InboundMessage>>>>,
    inbound_rx: Arc<Mutex<Option<mpsc::Receiver<InboundMessage>>>>,
    outbound_tx: Arc<RwLock<Option<mpsc::Sender<OutboundMessage>>>>,
    outbound_rx: Arc<Mutex<Option<mpsc::Receiver<OutboundMessage>>>>,
    closed: CancellationToken,
    capacity: usize,
}

impl MessageBus {
    /// Create a new message bus with the given per-queue capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        Self {
            inbound_tx: Arc::new(RwLock::new(Some(inbound_tx))),
            inbound_rx: Arc::new(Mutex::new(Some(inbound_rx))),
            outbound_tx: Arc::new(RwLock::new(Some(outbound_tx))),
            outbound_rx: Arc::new(Mutex::new(Some(outbound_rx))),
            closed: CancellationToken::new(),
            capacity,
        }
    }

    /// Per-queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the inbound receiver (can only be called once)
    pub fn take_inbound_receiver(&self) -> Option<InboundReceiver> {
        self.inbound_rx.lock().take().map(|rx| BusReceiver {
            rx,
            closed: self.closed.clone(),
        })
    }

    /// Take the outbound receiver (can only be called once)
    pub fn take_outbound_receiver(&self) -> Option<OutboundReceiver> {
        self.outbound_rx.lock().take().map(|rx| BusReceiver {
            rx,
            closed: self.closed.clone(),
        })
    }

    /// Publish a message from a channel to the agent
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        let tx = self.inbound_tx.read().clone().ok_or(Error::BusClosed)?;
        debug!(channel = %msg.channel, request_id = %msg.request_id, "publish inbound");
        send_until_closed(&tx, msg, &self.closed).await
    }

    /// Publish a response from the agent to channels
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        let tx = self.outbound_tx.read().clone().ok_or(Error::BusClosed)?;
        debug!(channel = %msg.channel, request_id = %msg.request_id, "publish outbound");
        send_until_closed(&tx, msg, &self.closed).await
    }

    /// Close both queues. Blocked and later publishes fail with `BusClosed`.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.inbound_tx.write().take();
        self.outbound_tx.write().take();
        debug!("Message bus closed");
    }

    /// Check if the bus has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

async fn send_until_closed<T>(
    tx: &mpsc::Sender<T>,
    msg: T,
    closed: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = closed.cancelled() => Err(Error::BusClosed),
        res = tx.send(msg) => res.map_err(|_| Error::BusClosed),
    }
}
