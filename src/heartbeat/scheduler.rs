//! HeartbeatScheduler - the top-level control loop
//!
//! ## Message Flow
//!
//! ```text
//! startup: wait_ready → every device Offline
//!
//! tick ─► list devices ─► grace reactivation ─► due set (oldest first)
//!              ─► Dispatcher ─► probe ─► state machine ─► update_device
//!                                                    └─► HeartbeatEvent
//! ```
//!
//! Ticks run back to back on a fixed cadence and never overlap: the next
//! tick waits until the dispatcher has drained the current batch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{Config, SchedulerConfig};
use crate::device::{Device, DeviceStatus, PingStatus};
use crate::probes::ProbeExecutor;
use crate::storage::DeviceRepository;

use super::dispatcher::Dispatcher;
use super::failures::FailureCounterStore;
use super::messages::{HeartbeatEvent, HeartbeatEventKind};
use super::transition::apply_outcome;

/// Capacity of the heartbeat event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything a single probe task needs
#[derive(Clone)]
struct ProbeContext {
    repository: Arc<dyn DeviceRepository>,
    executor: ProbeExecutor,
    failures: FailureCounterStore,
    event_tx: broadcast::Sender<HeartbeatEvent>,
}

impl ProbeContext {
    /// Probe one device, fold the result into its record and persist it
    ///
    /// Nothing is written if `cancel` fires before the probe completes.
    #[instrument(skip_all, fields(device_id = device.id))]
    async fn probe_and_record(&self, mut device: Device, cancel: CancellationToken) {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                trace!("probe cancelled");
                return;
            }
            outcome = self.executor.probe(&device) => outcome,
        };

        let Some(outcome) = outcome else {
            warn!("{}: no probe target, skipping", device.display_name());
            return;
        };

        let failures = self.failures.record(device.id, outcome.success);
        if !outcome.success {
            debug!(
                failures,
                error = outcome.diagnostics.error.as_deref().unwrap_or("unknown"),
                "{}: probe failed",
                device.display_name()
            );
        }

        let events = apply_outcome(&mut device, &outcome, failures, Utc::now());

        match self.repository.update_device(device.id, &device).await {
            Ok(true) => {}
            Ok(false) => warn!("{}: device no longer exists, result dropped", device.display_name()),
            Err(e) => error!("{}: failed to persist probe result: {e}", device.display_name()),
        }

        for event in events {
            publish(&self.event_tx, event);
        }
    }
}

fn publish(event_tx: &broadcast::Sender<HeartbeatEvent>, event: HeartbeatEvent) {
    match &event.kind {
        HeartbeatEventKind::StatusChanged { from, to } => {
            info!(device_id = event.device_id, "{}: heartbeat {from} -> {to}", event.device_name)
        }
        HeartbeatEventKind::ConnectivityChanged { from, to } => {
            info!(device_id = event.device_id, "{}: now {to} (was {from})", event.device_name)
        }
    }

    // no subscribers is fine
    if event_tx.send(event).is_err() {
        trace!("no receivers for heartbeat event");
    }
}

/// Whether a fully-failed device has cooled down long enough for a new
/// retry budget
pub fn grace_period_expired(device: &Device, failures: u32, now: DateTime<Utc>) -> bool {
    let max = device.max_retry_attempts();
    if max == 0 || failures < max || device.last_ping_status != PingStatus::Offline {
        return false;
    }

    let grace = i64::try_from(device.heartbeat_grace_period_ms).unwrap_or(i64::MAX);
    device
        .millis_since_last_attempt(now)
        .is_none_or(|elapsed| elapsed >= grace)
}

/// Whether a device should be probed in this tick
///
/// Devices without any target are never due.
pub fn is_due(device: &Device, failures: u32, first_tick: bool, now: DateTime<Utc>) -> bool {
    if !device.heartbeat_enabled || device.probe_host().is_none() {
        return false;
    }

    let max = device.max_retry_attempts();
    if max > 0 && failures >= max {
        return false;
    }

    if first_tick {
        return true;
    }

    let interval = i64::try_from(device.heartbeat_interval_ms).unwrap_or(i64::MAX);
    device
        .millis_since_last_attempt(now)
        .is_none_or(|elapsed| elapsed >= interval)
}

/// Devices to probe this tick, least recently attempted first
pub fn select_due(
    devices: &[Device],
    failures: &FailureCounterStore,
    first_tick: bool,
    now: DateTime<Utc>,
) -> Vec<Device> {
    let mut due: Vec<Device> = devices
        .iter()
        .filter(|device| {
            if device.heartbeat_enabled && device.probe_host().is_none() {
                warn!(
                    device_id = device.id,
                    "{}: heartbeat enabled but no target or IP address configured",
                    device.display_name()
                );
            }
            is_due(device, failures.get(device.id), first_tick, now)
        })
        .cloned()
        .collect();

    // None sorts before Some, so never-probed devices go first
    due.sort_by_key(|device| device.last_ping_attempt);
    due
}

/// Periodically probes every enabled device
pub struct HeartbeatScheduler {
    context: ProbeContext,
    dispatcher: Dispatcher,
    tick_interval: Duration,
    first_tick: bool,
    reset_done: bool,
}

impl HeartbeatScheduler {
    pub fn new(
        repository: Arc<dyn DeviceRepository>,
        executor: ProbeExecutor,
        config: &SchedulerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            context: ProbeContext {
                repository,
                executor,
                failures: FailureCounterStore::new(),
                event_tx,
            },
            dispatcher: Dispatcher::new(
                config.max_concurrent_probes,
                config.min_delay_between_starts(),
            ),
            tick_interval: config.tick_interval(),
            first_tick: true,
            reset_done: false,
        }
    }

    /// Build a scheduler and its probe executor from the hub configuration
    pub fn from_config(repository: Arc<dyn DeviceRepository>, config: &Config) -> Result<Self> {
        let executor = ProbeExecutor::new(&config.probe)?;
        Ok(Self::new(repository, executor, &config.scheduler))
    }

    /// Subscribe to heartbeat events
    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.context.event_tx.subscribe()
    }

    /// The failure counters owned by this scheduler
    pub fn failures(&self) -> &FailureCounterStore {
        &self.context.failures
    }

    /// Run until `cancel` fires
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            max_concurrent = self.dispatcher.max_concurrent(),
            "heartbeat scheduler starting"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("heartbeat scheduler cancelled before the repository became ready");
                return;
            }
            _ = self.context.repository.wait_ready() => {}
        }

        if let Err(e) = self.reset_all_offline().await {
            error!("failed to reset devices at startup, retrying next tick: {e:#}");
        }

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("heartbeat scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match AssertUnwindSafe(self.tick(&cancel)).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("heartbeat tick failed: {e:#}"),
                        Err(_) => error!("heartbeat tick panicked"),
                    }
                }
            }
        }

        debug!("heartbeat scheduler stopped");
    }

    /// Force every device into Offline with a fresh failure budget
    ///
    /// Returns the number of devices that were rewritten.
    #[instrument(skip_all)]
    pub async fn reset_all_offline(&mut self) -> Result<usize> {
        self.context.failures.clear();

        let devices = self
            .context
            .repository
            .list_devices()
            .await
            .context("failed to list devices")?;

        let mut written = 0;
        for mut device in devices {
            device.last_ping_status = PingStatus::Offline;
            device.status = DeviceStatus::Offline;
            device.consecutive_ping_failures = 0;

            match self.context.repository.update_device(device.id, &device).await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => error!("{}: failed to reset: {e}", device.display_name()),
            }
        }

        self.reset_done = true;
        info!("reset {written} devices to Offline");
        Ok(written)
    }

    /// One scheduler tick: reactivate, select, dispatch and drain
    #[instrument(skip_all)]
    pub async fn tick(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.reset_done {
            self.reset_all_offline().await?;
        }

        let now = Utc::now();
        let mut devices = self
            .context
            .repository
            .list_devices()
            .await
            .context("failed to list devices")?;

        let reactivated = self.reactivate_expired(&mut devices, now).await;

        let due = select_due(&devices, &self.context.failures, self.first_tick, now);
        self.first_tick = false;

        if due.is_empty() {
            trace!("no devices due");
            return Ok(());
        }

        debug!(due = due.len(), reactivated, "probing due devices");

        let context = self.context.clone();
        let token = cancel.clone();
        self.dispatcher
            .dispatch(due, cancel, move |device| {
                let context = context.clone();
                let cancel = token.clone();
                async move { context.probe_and_record(device, cancel).await }
            })
            .await;

        Ok(())
    }

    /// Give fully-failed devices a new retry budget once their grace period
    /// has passed. Updates `devices` in place.
    ///
    /// A device is only reactivated once the new state has been written; a
    /// failed write leaves it parked and it is retried next tick.
    async fn reactivate_expired(&self, devices: &mut [Device], now: DateTime<Utc>) -> usize {
        let mut reactivated = 0;

        for device in devices.iter_mut() {
            let failures = self.context.failures.get(device.id);
            if !grace_period_expired(device, failures, now) {
                continue;
            }

            let previous = device.last_ping_status;
            let mut retesting = device.clone();
            retesting.last_ping_status = PingStatus::Testing;
            retesting.consecutive_ping_failures = 0;

            match self.context.repository.update_device(retesting.id, &retesting).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("{}: device no longer exists, not reactivated", device.display_name());
                    continue;
                }
                Err(e) => {
                    error!("{}: failed to persist reactivation: {e}", device.display_name());
                    continue;
                }
            }

            debug!(device_id = device.id, "{}: grace period over, retesting", device.display_name());

            self.context.failures.reset(device.id);
            *device = retesting;
            reactivated += 1;

            publish(
                &self.context.event_tx,
                HeartbeatEvent::new(
                    device,
                    now,
                    HeartbeatEventKind::StatusChanged {
                        from: previous,
                        to: PingStatus::Testing,
                    },
                ),
            );
        }

        reactivated
    }
}

/// Handle for a running [`HeartbeatScheduler`]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    event_tx: broadcast::Sender<HeartbeatEvent>,
    failures: FailureCounterStore,
}

impl SchedulerHandle {
    /// Spawn the scheduler as a tokio task
    pub fn spawn(scheduler: HeartbeatScheduler) -> Self {
        Self::spawn_with_token(scheduler, CancellationToken::new())
    }

    /// Spawn the scheduler, stopping when `cancel` (or [`stop`](Self::stop)) fires
    pub fn spawn_with_token(scheduler: HeartbeatScheduler, cancel: CancellationToken) -> Self {
        let event_tx = scheduler.context.event_tx.clone();
        let failures = scheduler.context.failures.clone();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        Self {
            cancel,
            task,
            event_tx,
            failures,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.event_tx.subscribe()
    }

    pub fn failures(&self) -> &FailureCounterStore {
        &self.failures
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the scheduler and wait for in-flight probes to wind down
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await.context("heartbeat scheduler task failed")?;
        Ok(())
    }
}
