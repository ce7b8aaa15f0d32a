//! Events published by the heartbeat engine
//!
//! Events go out on a broadcast channel. Nobody listening is fine, a slow
//! subscriber may lag and miss events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceId, DeviceStatus, PingStatus};

/// A reportable change on a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub device_id: DeviceId,

    /// Display name for logging
    pub device_name: String,

    /// When the change was observed
    pub timestamp: DateTime<Utc>,

    pub kind: HeartbeatEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeartbeatEventKind {
    /// The fine-grained heartbeat status changed
    StatusChanged { from: PingStatus, to: PingStatus },

    /// The coarse Online/Offline status changed
    ConnectivityChanged { from: DeviceStatus, to: DeviceStatus },
}

impl HeartbeatEvent {
    pub fn new(device: &Device, timestamp: DateTime<Utc>, kind: HeartbeatEventKind) -> Self {
        Self {
            device_id: device.id,
            device_name: device.display_name(),
            timestamp,
            kind,
        }
    }
}
