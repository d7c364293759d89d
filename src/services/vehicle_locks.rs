//! Per-vehicle async mutexes.
//!
//! Image operations write a file and then update the vehicle row. Holding the
//! vehicle's lock across both keeps concurrent uploads, replacements and
//! deletes for the same vehicle from interleaving.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default, Debug)]
pub struct VehicleLocks {
    inner: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl VehicleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `vehicle_id`.
    pub async fn acquire(&self, vehicle_id: i64) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting.
        let lock = self
            .inner
            .entry(vehicle_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for a vehicle that no longer exists.
    pub fn forget(&self, vehicle_id: i64) {
        self.inner.remove(&vehicle_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}
