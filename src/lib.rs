pub mod config;
pub mod device;
pub mod heartbeat;
pub mod probes;
pub mod storage;
pub mod util;

pub use device::{Device, DeviceId, DeviceStatus, HeartbeatProtocol, PingStatus};
