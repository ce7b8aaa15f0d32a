//! Consecutive-failure counters
//!
//! Lives only as long as the process. The scheduler owns one store and hands
//! clones of it to every probe task; clones share the same map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::DeviceId;

#[derive(Debug, Clone, Default)]
pub struct FailureCounterStore {
    counts: Arc<Mutex<HashMap<DeviceId, u32>>>,
}

impl FailureCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, u32>> {
        // a poisoned map still holds valid counters
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current failure count, 0 for unknown devices
    pub fn get(&self, id: DeviceId) -> u32 {
        self.lock().get(&id).copied().unwrap_or(0)
    }

    /// Fold one probe result into the counter and return the new value
    ///
    /// Success resets to 0, failure increments. Both happen under one lock.
    pub fn record(&self, id: DeviceId, success: bool) -> u32 {
        let mut counts = self.lock();
        if success {
            counts.insert(id, 0);
            0
        } else {
            let count = counts.entry(id).or_insert(0);
            *count = count.saturating_add(1);
            *count
        }
    }

    /// Reset a device to a fresh retry budget
    pub fn reset(&self, id: DeviceId) {
        self.lock().insert(id, 0);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
