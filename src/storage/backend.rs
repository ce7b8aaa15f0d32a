//! Device repository trait definition

use async_trait::async_trait;

use super::error::StorageResult;
use crate::device::{Device, DeviceId};

/// Registry of devices consumed by the heartbeat engine
///
/// Implementations must be `Send + Sync`: probe tasks write results back
/// concurrently from different Tokio tasks.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    /// Resolve once the repository can serve requests
    ///
    /// Awaited a single time before the scheduler's first tick.
    async fn wait_ready(&self) {}

    /// All known devices, enabled or not
    async fn list_devices(&self) -> StorageResult<Vec<Device>>;

    /// Write the runtime heartbeat fields of `device` onto the record for `id`
    ///
    /// Identity and configuration columns are never touched, so edits made
    /// while a probe was in flight survive its write-back. Returns `false`
    /// when no device with that id exists.
    async fn update_device(&self, id: DeviceId, device: &Device) -> StorageResult<bool>;

    /// Insert a device, or replace its identity and configuration if the id
    /// is already taken. Runtime heartbeat fields of an existing record are
    /// kept.
    async fn upsert_device(&self, device: &Device) -> StorageResult<()>;
}
