//! Bounded pool of target devices shared by concurrent test attempts.
//!
//! Devices are interchangeable and leases are exclusive. Capacity is fixed
//! at construction; a reservation blocks until a device frees up or the
//! caller's cancellation token fires.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct PoolInner {
    free: Mutex<VecDeque<String>>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Fixed-capacity device pool. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct DevicePool {
    inner: Arc<PoolInner>,
}

impl DevicePool {
    pub fn new(serials: Vec<String>) -> Self {
        let capacity = serials.len();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(serials.into()),
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Block until a device is free, or until `cancel` fires.
    ///
    /// Cancellation surfaces as `None`, not an error: the caller decides how
    /// to unwind. The returned lease gives its device back on drop, on every
    /// exit path.
    pub async fn reserve(&self, cancel: &CancellationToken) -> Option<DeviceLease> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return None,
            permit = self.inner.semaphore.clone().acquire_owned() => {
                // The semaphore is never closed while the pool is alive.
                permit.expect("device pool semaphore closed")
            }
        };

        let serial = {
            let mut free = self.inner.free.lock().expect("device pool lock poisoned");
            // A permit guarantees a free serial.
            free.pop_front().expect("device pool out of sync")
        };

        tracing::debug!(serial = %serial, "reserved device");
        Some(DeviceLease {
            serial: Some(serial),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// Exclusive, non-reentrant hold on one pooled device.
#[derive(Debug)]
pub struct DeviceLease {
    serial: Option<String>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl DeviceLease {
    pub fn serial(&self) -> &str {
        self.serial.as_deref().expect("lease already released")
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Some(serial) = self.serial.take() {
            tracing::debug!(serial = %serial, "released device");
            let mut free = self.pool.free.lock().expect("device pool lock poisoned");
            free.push_back(serial);
        }
        // The permit drops after the serial is back in the free list, so a
        // woken waiter always finds one.
    }
}
