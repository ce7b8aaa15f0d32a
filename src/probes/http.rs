//! HTTP heartbeat probe
//!
//! `GET`s the device heartbeat endpoint. Devices answer with a small JSON
//! document:
//!
//! ```json
//! {"status":"OK","mac":"AA:BB:CC:DD:EE:FF","firmware":"1.4.2","uptime":81234,"free_heap":181240}
//! ```
//!
//! Every field is optional. Only `mac` can fail a probe, and only when the
//! device record carries a hardware identifier to compare it against.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use tracing::{trace, warn};

use super::ProbeDiagnostics;

/// Keys a device may use to report its MAC address
const MAC_KEYS: [&str; 3] = ["mac", "macAddress", "mac_address"];

#[derive(Debug, Clone)]
pub struct HttpProbe {
    /// HTTP client (reused across probes)
    client: reqwest::Client,
}

/// Fields recognized in a heartbeat response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub mac: Option<String>,
    pub firmware: Option<String>,
    pub uptime_ms: Option<u64>,
    pub free_heap: Option<u64>,
}

impl HeartbeatReport {
    /// Best-effort extraction, fields of the wrong type are ignored
    pub fn from_json(json: &Value) -> Self {
        let Some(object) = json.as_object() else {
            return Self::default();
        };

        Self {
            mac: MAC_KEYS
                .iter()
                .find_map(|key| object.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            firmware: object
                .get("firmware")
                .and_then(Value::as_str)
                .map(str::to_string),
            uptime_ms: object.get("uptime").and_then(Value::as_u64),
            free_heap: object.get("free_heap").and_then(Value::as_u64),
        }
    }
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Run one check against `url`
    pub async fn check(
        &self,
        url: &str,
        expected_value: Option<&str>,
        stored_identifier: Option<&str>,
    ) -> (bool, ProbeDiagnostics) {
        let mut diagnostics = ProbeDiagnostics::default();

        trace!("requesting heartbeat from {url}");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                trace!("{url}: error during request: {e}");
                diagnostics.error = Some(format!("HTTP request failed: {e}"));
                return (false, diagnostics);
            }
        };

        let status = response.status();
        diagnostics.http_status = Some(status.as_u16());

        if !status.is_success() {
            diagnostics.error = Some(format!("Unexpected status code: {}", status.as_u16()));
            return (false, diagnostics);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                diagnostics.error = Some(format!("Failed to read response body: {e}"));
                return (false, diagnostics);
            }
        };

        let valid = evaluate_body(&body, expected_value, stored_identifier, &mut diagnostics);
        (valid, diagnostics)
    }
}

/// Decide whether a 2xx body counts as a healthy heartbeat
///
/// The expected value must appear somewhere in the body. A JSON body is
/// additionally checked for a MAC that matches the stored identifier; a
/// missing MAC or a non-JSON body skips that check.
pub fn evaluate_body(
    body: &str,
    expected_value: Option<&str>,
    stored_identifier: Option<&str>,
    diagnostics: &mut ProbeDiagnostics,
) -> bool {
    let mut valid = true;

    if let Some(expected) = expected_value.filter(|e| !e.is_empty() && !body.contains(*e)) {
        diagnostics.expected_value_missing = true;
        diagnostics.error = Some(format!("response does not contain '{expected}'"));
        valid = false;
    }

    let Ok(json) = serde_json::from_str::<Value>(body) else {
        trace!("heartbeat body is not JSON, skipping identity check");
        return valid;
    };

    let report = HeartbeatReport::from_json(&json);
    diagnostics.firmware = report.firmware;
    diagnostics.uptime_ms = report.uptime_ms;
    diagnostics.free_heap = report.free_heap;

    let stored = stored_identifier.map(str::trim).filter(|s| !s.is_empty());
    if let (Some(stored), Some(reported)) = (stored, report.mac.as_deref()) {
        if !stored.eq_ignore_ascii_case(reported.trim()) {
            warn!("identity mismatch: expected {stored}, device reported {reported}");
            diagnostics.identity_mismatch = true;
            diagnostics.error = Some(format!(
                "device reported MAC {reported}, expected {stored}"
            ));
            valid = false;
        }
    }
    diagnostics.reported_mac = report.mac;

    valid
}
