//! ICMP echo probe
//!
//! Raw ICMP sockets need elevated privileges, so the probe runs the
//! platform `ping` binary for a single echo request. The child is killed
//! when the probe future is dropped.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::ProbeDiagnostics;

/// Extra time granted to `ping` itself on top of the echo timeout
const PROCESS_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct IcmpProbe {
    program: String,
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("ping", timeout)
    }

    /// Use a specific `ping` binary
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Send one echo request to `host`
    pub async fn check(&self, host: &str) -> (bool, ProbeDiagnostics) {
        let mut diagnostics = ProbeDiagnostics::default();

        let mut command = Command::new(&self.program);
        command
            .args(echo_args(self.timeout))
            .arg(host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        trace!("sending echo request to {host}");

        let output = match tokio::time::timeout(self.timeout + PROCESS_SLACK, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                diagnostics.error = Some(format!("failed to run {}: {e}", self.program));
                return (false, diagnostics);
            }
            Err(_) => {
                diagnostics.error = Some(format!(
                    "no echo reply within {}ms",
                    self.timeout.as_millis()
                ));
                return (false, diagnostics);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        diagnostics.round_trip_ms = parse_round_trip(&stdout);

        let success = output.status.success();
        if !success {
            diagnostics.error = Some(match output.status.code() {
                Some(code) => format!("ping exited with status {code}"),
                None => "ping terminated by signal".to_string(),
            });
        }

        (success, diagnostics)
    }
}

/// Arguments for a single echo request with the given timeout
#[cfg(target_os = "windows")]
fn echo_args(timeout: Duration) -> Vec<String> {
    vec![
        "-n".to_string(),
        "1".to_string(),
        "-w".to_string(),
        timeout.as_millis().to_string(),
    ]
}

/// Arguments for a single echo request with the given timeout
#[cfg(target_os = "macos")]
fn echo_args(timeout: Duration) -> Vec<String> {
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        timeout.as_millis().to_string(),
    ]
}

/// Arguments for a single echo request with the given timeout
///
/// iputils takes whole seconds for `-W`.
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn echo_args(timeout: Duration) -> Vec<String> {
    let secs = timeout.as_millis().div_ceil(1000).max(1);
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        secs.to_string(),
    ]
}

/// Pull the round-trip time out of `ping` output (`time=0.417 ms`, `time<1ms`)
pub fn parse_round_trip(output: &str) -> Option<f64> {
    static RTT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RTT
        .get_or_init(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").ok())
        .as_ref()?;

    re.captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
