//! Connection slot limiter for the object store client.
//!
//! Every request holds one slot for its duration. When all slots are taken,
//! callers wait: the pool size is the backpressure valve, so it should be at
//! least the number of transfers expected to run at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{TransferError, TransferResult};

/// Default number of connection slots per worker.
pub const SLOTS_PER_WORKER: usize = 2;

/// Bounded set of connection slots shared by every caller of one client.
#[derive(Debug, Clone)]
pub struct ConnectionSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
}

/// A held slot. Released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConnectionSlots {
    /// Create a limiter with `capacity` slots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        tracing::debug!(capacity, "Created connection slot limiter");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Size the pool for `workers` concurrent transfers.
    pub fn for_workers(workers: usize) -> Self {
        Self::new(workers.max(1) * SLOTS_PER_WORKER)
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> TransferResult<ConnectionSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| TransferError::unavailable("connect", "connection pool closed"))?;
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionSlot {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_min_capacity() {
        assert_eq!(ConnectionSlots::new(0).capacity(), 1);
        assert_eq!(ConnectionSlots::for_workers(4).capacity(), 8);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let slots = ConnectionSlots::new(2);

        let first = slots.acquire().await.unwrap();
        let _second = slots.acquire().await.unwrap();
        assert_eq!(slots.in_flight(), 2);
        assert_eq!(slots.available(), 0);

        drop(first);
        assert_eq!(slots.in_flight(), 1);
        assert_eq!(slots.available(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_blocks() {
        let slots = ConnectionSlots::new(1);
        let _held = slots.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), slots.acquire()).await;
        assert!(waited.is_err(), "second acquire should wait for a free slot");
    }
}
