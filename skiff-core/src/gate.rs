//! Admission gate: a counting semaphore with cancellable acquire

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Fixed-capacity concurrency limiter.
///
/// A slot must be acquired before starting work and is released when the
/// returned [`GatePermit`] drops.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held gate slot
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Create a gate with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, or fail with `Error::Cancelled` when `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("gate acquire cancelled".to_string()));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled("gate acquire cancelled".to_string())),
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit
                .map(|p| GatePermit { _permit: p })
                .map_err(|_| Error::Internal("admission gate closed".to_string())),
        }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
