//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use heartbeat_monitor::{
    config::{ProbeConfig, SchedulerConfig},
    heartbeat::HeartbeatScheduler,
    probes::ProbeExecutor,
    storage::DeviceRepository,
    Device, HeartbeatProtocol,
};
use wiremock::MockServer;

pub const HEALTH_PATH: &str = "/api/health/heartbeat";

/// `host:port` of a mock server, usable as a device IP address
pub fn mock_address(server: &MockServer) -> String {
    let url = url::Url::parse(&server.uri()).unwrap();
    format!("{}:{}", url.host_str().unwrap(), url.port().unwrap())
}

/// Enabled HTTP device pointing at the mock server's heartbeat path
pub fn http_device(id: i64, server: &MockServer) -> Device {
    let mut device = Device::new(id, format!("Test Device {id}"));
    device.heartbeat_protocol = HeartbeatProtocol::Http;
    device.ip_address = Some(mock_address(server));
    device
}

pub fn probe_config() -> ProbeConfig {
    ProbeConfig {
        http_timeout_ms: 1_000,
        ..ProbeConfig::default()
    }
}

pub fn executor() -> ProbeExecutor {
    ProbeExecutor::new(&probe_config()).unwrap()
}

pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_ms: 50,
        max_concurrent_probes: 5,
        min_delay_between_starts_ms: 0,
    }
}

pub fn scheduler(repository: Arc<dyn DeviceRepository>) -> HeartbeatScheduler {
    HeartbeatScheduler::new(repository, executor(), &fast_scheduler_config())
}

pub fn heartbeat_json(mac: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "OK",
        "mac": mac,
        "firmware": "1.4.2",
        "uptime": 81234,
        "free_heap": 181240
    })
}
