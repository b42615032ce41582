//! Bounded worker groups.
//!
//! A group caps how many tasks hold one of its slots at a time. Acquisition waits when the
//! group is full; tokio's semaphore queues waiters in FIFO order, so the wait queue is fair.
//! The dispatcher keeps two independent groups: one for attempts, one for coordinators.

use crate::error::DispatchError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct WorkerGroup {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    size: usize,
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerGroup {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self { name, semaphore: Arc::new(Semaphore::new(size)), size }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<WorkerSlot, DispatchError> {
        let permit =
            self.semaphore.clone().acquire_owned().await.map_err(|_| DispatchError::Closed)?;
        tracing::trace!(group = self.name, in_use = self.in_use(), "worker slot acquired");
        Ok(WorkerSlot { _permit: permit })
    }
}
