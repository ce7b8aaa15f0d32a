//! Heartbeat status state machine
//!
//! ```text
//! success                      → Online   (coarse Online)
//! failure, failures >= max > 0 → Offline  (coarse Offline)
//! failure, otherwise:
//!   Online                     → Unstable
//!   Testing | Failed           → Retesting
//!   Offline                    → Testing
//!   Retesting | Unstable       → Retesting
//!   Timeout                    → Retesting
//!   Unknown                    → Testing
//! ```
//!
//! Failures below the retry budget leave the coarse status untouched.

use chrono::{DateTime, Utc};

use crate::device::{Device, DeviceStatus, PingStatus};
use crate::probes::ProbeOutcome;

use super::messages::{HeartbeatEvent, HeartbeatEventKind};

/// Result of a single transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: PingStatus,
    /// `None` keeps the previous coarse status
    pub coarse: Option<DeviceStatus>,
}

/// Compute the next heartbeat state
///
/// `failures` is the counter value after this probe was recorded.
pub fn next_status(previous: PingStatus, success: bool, failures: u32, max_retries: u32) -> Transition {
    if success {
        return Transition {
            status: PingStatus::Online,
            coarse: Some(DeviceStatus::Online),
        };
    }

    if max_retries > 0 && failures >= max_retries {
        return Transition {
            status: PingStatus::Offline,
            coarse: Some(DeviceStatus::Offline),
        };
    }

    let status = match previous {
        PingStatus::Online => PingStatus::Unstable,
        PingStatus::Testing | PingStatus::Failed => PingStatus::Retesting,
        PingStatus::Offline => PingStatus::Testing,
        PingStatus::Retesting | PingStatus::Unstable | PingStatus::Timeout => PingStatus::Retesting,
        PingStatus::Unknown => PingStatus::Testing,
    };

    Transition {
        status,
        coarse: None,
    }
}

/// Write a probe result into a device record
///
/// Returns the events for every field that actually changed.
pub fn apply_outcome(
    device: &mut Device,
    outcome: &ProbeOutcome,
    failures: u32,
    now: DateTime<Utc>,
) -> Vec<HeartbeatEvent> {
    let transition = next_status(
        device.last_ping_status,
        outcome.success,
        failures,
        device.max_retry_attempts(),
    );

    device.last_ping_attempt = Some(now);
    device.last_ping_duration_ms = Some(outcome.duration_ms);
    device.consecutive_ping_failures = failures;
    if outcome.success {
        device.last_pinged = Some(now);
    }

    let mut events = Vec::new();

    if device.last_ping_status != transition.status {
        events.push(HeartbeatEvent::new(
            device,
            now,
            HeartbeatEventKind::StatusChanged {
                from: device.last_ping_status,
                to: transition.status,
            },
        ));
        device.last_ping_status = transition.status;
    }

    if let Some(coarse) = transition.coarse.filter(|coarse| *coarse != device.status) {
        events.push(HeartbeatEvent::new(
            device,
            now,
            HeartbeatEventKind::ConnectivityChanged {
                from: device.status,
                to: coarse,
            },
        ));
        device.status = coarse;
    }

    events
}
