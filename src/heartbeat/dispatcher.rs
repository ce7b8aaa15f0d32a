//! Concurrency-limited probe dispatcher
//!
//! ```text
//! due devices (oldest first)
//!   │
//!   ├─ wait min_delay ─ acquire slot ─ spawn ──► probe task ─► release slot
//!   ├─ wait min_delay ─ acquire slot ─ spawn ──► probe task ─► release slot
//!   └─ ...
//!                                      join all ◄──────────────┘
//! ```
//!
//! Slots are acquired in the dispatch loop rather than inside the spawned
//! tasks, so probes start in exactly the order they were handed in.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::device::Device;

/// Runs one batch of probes under a parallelism budget
#[derive(Debug, Clone)]
pub struct Dispatcher {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    min_delay_between_starts: Duration,
}

impl Dispatcher {
    pub fn new(max_concurrent: usize, min_delay_between_starts: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_delay_between_starts,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `task` once per device and wait for every spawned task to finish
    ///
    /// Stops starting new tasks as soon as `cancel` fires. Tasks already
    /// running are expected to watch the same token.
    pub async fn dispatch<F, Fut>(&self, devices: Vec<Device>, cancel: &CancellationToken, task: F)
    where
        F: Fn(Device) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if devices.is_empty() {
            return;
        }

        debug!(
            count = devices.len(),
            max_concurrent = self.max_concurrent,
            "dispatching probes"
        );

        let mut running = JoinSet::new();

        for (index, device) in devices.into_iter().enumerate() {
            if index > 0 && !self.min_delay_between_starts.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.min_delay_between_starts) => {}
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!("probe slots closed: {e}");
                        break;
                    }
                },
            };

            trace!(device_id = device.id, "starting probe");
            let probe = task(device);
            running.spawn(async move {
                probe.await;
                drop(permit);
            });
        }

        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                error!("probe task failed: {e}");
            }
        }
    }
}
