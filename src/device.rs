//! Device records as seen by the heartbeat engine
//!
//! The repository owns these records. The engine only rewrites the
//! runtime fields (`last_ping_*`, `consecutive_ping_failures`, `status`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DeviceId = i64;

/// Retry budget used when a device does not configure one
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Probe protocol of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HeartbeatProtocol {
    #[default]
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "ICMP")]
    Icmp,
}

impl fmt::Display for HeartbeatProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatProtocol::Http => write!(f, "HTTP"),
            HeartbeatProtocol::Icmp => write!(f, "ICMP"),
        }
    }
}

impl FromStr for HeartbeatProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(HeartbeatProtocol::Http),
            "ICMP" => Ok(HeartbeatProtocol::Icmp),
            other => Err(format!("unknown heartbeat protocol: {other}")),
        }
    }
}

/// Fine-grained heartbeat state of a device
///
/// `Failed` is only ever read from older records, the engine never writes it.
/// Anything the engine does not recognize decodes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PingStatus {
    #[default]
    Offline,
    Testing,
    Online,
    Unstable,
    Retesting,
    Timeout,
    Failed,
    Unknown,
}

impl PingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PingStatus::Offline => "Offline",
            PingStatus::Testing => "Testing",
            PingStatus::Online => "Online",
            PingStatus::Unstable => "Unstable",
            PingStatus::Retesting => "Retesting",
            PingStatus::Timeout => "Timeout",
            PingStatus::Failed => "Failed",
            PingStatus::Unknown => "Unknown",
        }
    }

    /// Lenient decoding for values read back from storage
    pub fn parse_lossy(s: &str) -> PingStatus {
        match s {
            "Offline" => PingStatus::Offline,
            "Testing" => PingStatus::Testing,
            "Online" => PingStatus::Online,
            "Unstable" => PingStatus::Unstable,
            "Retesting" => PingStatus::Retesting,
            "Timeout" => PingStatus::Timeout,
            "Failed" => PingStatus::Failed,
            _ => PingStatus::Unknown,
        }
    }
}

impl From<String> for PingStatus {
    fn from(value: String) -> Self {
        PingStatus::parse_lossy(&value)
    }
}

impl From<PingStatus> for String {
    fn from(value: PingStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse Online/Offline summary of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "Online",
            DeviceStatus::Offline => "Offline",
        }
    }

    pub fn parse_lossy(s: &str) -> DeviceStatus {
        if s.eq_ignore_ascii_case("online") {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Hardware identifier, usually the MAC address
    #[serde(default)]
    pub unique_identifier: Option<String>,

    #[serde(default)]
    pub heartbeat_enabled: bool,
    #[serde(default)]
    pub heartbeat_protocol: HeartbeatProtocol,
    /// Explicit URL (HTTP) or host (ICMP) overriding the IP address
    #[serde(default)]
    pub heartbeat_target: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// `Some(0)` means retry forever, `None` falls back to [`DEFAULT_MAX_RETRY_ATTEMPTS`]
    #[serde(default)]
    pub heartbeat_max_retry_attempts: Option<u32>,
    #[serde(default = "default_grace_period_ms")]
    pub heartbeat_grace_period_ms: u64,
    #[serde(default)]
    pub heartbeat_expected_value: Option<String>,

    #[serde(default)]
    pub last_ping_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_pinged: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_ping_status: PingStatus,
    #[serde(default)]
    pub last_ping_duration_ms: Option<u64>,
    /// Mirror of the in-memory failure counter, never read back by the engine
    #[serde(default)]
    pub consecutive_ping_failures: u32,
    #[serde(default)]
    pub status: DeviceStatus,
}

fn default_interval_ms() -> u64 {
    60_000
}

fn default_grace_period_ms() -> u64 {
    60_000
}

impl Device {
    /// Create an enabled device with default heartbeat settings
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ip_address: None,
            unique_identifier: None,
            heartbeat_enabled: true,
            heartbeat_protocol: HeartbeatProtocol::Http,
            heartbeat_target: None,
            heartbeat_interval_ms: default_interval_ms(),
            heartbeat_max_retry_attempts: None,
            heartbeat_grace_period_ms: default_grace_period_ms(),
            heartbeat_expected_value: None,
            last_ping_attempt: None,
            last_pinged: None,
            last_ping_status: PingStatus::Offline,
            last_ping_duration_ms: None,
            consecutive_ping_failures: 0,
            status: DeviceStatus::Offline,
        }
    }

    /// Configured retry budget, 0 meaning unlimited
    pub fn max_retry_attempts(&self) -> u32 {
        self.heartbeat_max_retry_attempts
            .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS)
    }

    /// Host the probe should reach: the explicit target, else the IP address
    ///
    /// Blank strings count as unset.
    pub fn probe_host(&self) -> Option<&str> {
        non_blank(self.heartbeat_target.as_deref()).or_else(|| non_blank(self.ip_address.as_deref()))
    }

    /// Milliseconds since the last probe attempt, `None` if never attempted
    pub fn millis_since_last_attempt(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_ping_attempt
            .map(|last| (now - last).num_milliseconds())
    }

    /// Copy the fields the heartbeat engine owns from `other`
    ///
    /// Identity and heartbeat configuration are left as they are.
    pub fn copy_runtime_from(&mut self, other: &Device) {
        self.last_ping_attempt = other.last_ping_attempt;
        self.last_pinged = other.last_pinged;
        self.last_ping_status = other.last_ping_status;
        self.last_ping_duration_ms = other.last_ping_duration_ms;
        self.consecutive_ping_failures = other.consecutive_ping_failures;
        self.status = other.status;
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("device-{}", self.id)
        } else {
            self.name.clone()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
