//! In-memory device repository (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Deployments where the device list comes from the config file only

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};
use tracing::debug;

use super::backend::DeviceRepository;
use super::error::StorageResult;
use crate::device::{Device, DeviceId};

pub struct MemoryRepository {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    ready_tx: watch::Sender<bool>,
}

impl MemoryRepository {
    /// Create an empty repository that is ready immediately
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(true);
        Self {
            devices: RwLock::new(BTreeMap::new()),
            ready_tx,
        }
    }

    /// Create a repository that stays unready until [`mark_ready`](Self::mark_ready)
    pub fn pending() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            devices: RwLock::new(BTreeMap::new()),
            ready_tx,
        }
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let (ready_tx, _) = watch::channel(true);
        Self {
            devices: RwLock::new(devices.into_iter().map(|d| (d.id, d)).collect()),
            ready_tx,
        }
    }

    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    pub async fn get(&self, id: DeviceId) -> Option<Device> {
        self.devices.read().await.get(&id).cloned()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceRepository for MemoryRepository {
    async fn wait_ready(&self) {
        let mut ready_rx = self.ready_tx.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = ready_rx.wait_for(|ready| *ready).await;
    }

    async fn list_devices(&self) -> StorageResult<Vec<Device>> {
        Ok(self.devices.read().await.values().cloned().collect())
    }

    async fn update_device(&self, id: DeviceId, device: &Device) -> StorageResult<bool> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&id) {
            Some(stored) => {
                stored.copy_runtime_from(device);
                Ok(true)
            }
            None => {
                debug!("update for unknown device {id}");
                Ok(false)
            }
        }
    }

    async fn upsert_device(&self, device: &Device) -> StorageResult<()> {
        let mut devices = self.devices.write().await;
        let mut incoming = device.clone();
        if let Some(stored) = devices.get(&device.id) {
            incoming.copy_runtime_from(stored);
        }
        devices.insert(device.id, incoming);
        Ok(())
    }
}
