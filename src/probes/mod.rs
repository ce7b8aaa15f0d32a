//! Liveness probes
//!
//! One probe implementation per [`HeartbeatProtocol`] variant, selected with
//! a plain `match` in [`ProbeExecutor::probe`]. A probe never fails with an
//! error: timeouts, refused connections and mismatching content all come
//! back as an unsuccessful [`ProbeOutcome`].

pub mod http;
pub mod icmp;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::ProbeConfig;
use crate::device::{Device, HeartbeatProtocol};

use self::http::HttpProbe;
use self::icmp::IcmpProbe;

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,

    /// Wall-clock time spent, recorded for failures as well
    pub duration_ms: u64,

    pub diagnostics: ProbeDiagnostics,
}

/// Extra facts gathered while probing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeDiagnostics {
    /// URL or host that was probed
    pub target: String,
    pub http_status: Option<u16>,
    pub error: Option<String>,

    /// Fields reported by the device heartbeat endpoint
    pub reported_mac: Option<String>,
    pub firmware: Option<String>,
    pub uptime_ms: Option<u64>,
    pub free_heap: Option<u64>,

    /// Echo round-trip reported by `ping`
    pub round_trip_ms: Option<f64>,

    /// The reported MAC differs from the stored identifier
    pub identity_mismatch: bool,

    /// The configured expected value was not in the body
    pub expected_value_missing: bool,
}

/// Where a probe goes, resolved from a device record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    Http { url: String },
    Icmp { host: String },
}

impl ProbeTarget {
    /// Resolve the target of a device, `None` when it has neither an
    /// explicit target nor an IP address
    pub fn resolve(device: &Device, health_path: &str) -> Option<ProbeTarget> {
        let explicit = device
            .heartbeat_target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        match device.heartbeat_protocol {
            HeartbeatProtocol::Http => {
                let url = match explicit {
                    Some(target) if target.contains("://") => target.to_string(),
                    Some(target) => format!("http://{target}"),
                    None => {
                        let ip = device.probe_host()?;
                        let path = health_path.trim_start_matches('/');
                        format!("http://{ip}/{path}")
                    }
                };
                Some(ProbeTarget::Http { url })
            }
            HeartbeatProtocol::Icmp => device.probe_host().map(|host| ProbeTarget::Icmp {
                host: strip_port(host).to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProbeTarget::Http { url } => url,
            ProbeTarget::Icmp { host } => host,
        }
    }
}

/// `ping` takes a bare host, so drop any `:port` suffix
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return rest.split_once(']').map_or(host, |(ip, _)| ip);
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.parse::<u16>().is_ok() => name,
        _ => host,
    }
}

/// Runs probes for any protocol
///
/// Holds the shared HTTP client, so one executor should serve every probe.
#[derive(Debug, Clone)]
pub struct ProbeExecutor {
    http: HttpProbe,
    icmp: IcmpProbe,
    health_path: String,
}

impl ProbeExecutor {
    pub fn new(config: &ProbeConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpProbe::new(config.http_timeout())?,
            icmp: IcmpProbe::new(config.icmp_timeout()),
            health_path: config.health_path.clone(),
        })
    }

    /// Probe one device
    ///
    /// Returns `None` if the device has nothing to probe.
    #[instrument(skip_all, fields(device_id = device.id, protocol = %device.heartbeat_protocol))]
    pub async fn probe(&self, device: &Device) -> Option<ProbeOutcome> {
        let target = ProbeTarget::resolve(device, &self.health_path)?;

        let start = Instant::now();
        let (success, mut diagnostics) = match &target {
            ProbeTarget::Http { url } => {
                self.http
                    .check(
                        url,
                        device.heartbeat_expected_value.as_deref(),
                        device.unique_identifier.as_deref(),
                    )
                    .await
            }
            ProbeTarget::Icmp { host } => self.icmp.check(host).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        diagnostics.target = target.as_str().to_string();

        debug!(success, duration_ms, target = %diagnostics.target, "probe finished");

        Some(ProbeOutcome {
            success,
            duration_ms,
            diagnostics,
        })
    }
}
