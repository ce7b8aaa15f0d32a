//! Full scheduler ticks: repository → probe → state machine → repository

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use heartbeat_monitor::{
    heartbeat::{HeartbeatEventKind, SchedulerHandle},
    storage::{DeviceRepository, MemoryRepository},
    DeviceStatus, PingStatus,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn healthy_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HEALTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(heartbeat_json("AA:BB:CC")))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_startup_reset_forces_offline() {
    let server = healthy_server().await;
    let mut device = http_device(1, &server);
    device.last_ping_status = PingStatus::Online;
    device.status = DeviceStatus::Online;
    device.consecutive_ping_failures = 2;

    let repo = Arc::new(MemoryRepository::with_devices([device]));
    let mut scheduler = scheduler(repo.clone());
    scheduler.failures().record(1, false);

    assert_eq!(scheduler.reset_all_offline().await.unwrap(), 1);

    let stored = repo.get(1).await.unwrap();
    assert_eq!(stored.last_ping_status, PingStatus::Offline);
    assert_eq!(stored.status, DeviceStatus::Offline);
    assert_eq!(stored.consecutive_ping_failures, 0);
    assert!(scheduler.failures().is_empty());
}

#[tokio::test]
async fn test_tick_probes_and_persists_success() {
    let server = healthy_server().await;
    let mut device = http_device(1, &server);
    device.unique_identifier = Some("aa:bb:cc".to_string());

    let repo = Arc::new(MemoryRepository::with_devices([device]));
    let mut scheduler = scheduler(repo.clone());
    let mut events = scheduler.subscribe();

    scheduler.tick(&CancellationToken::new()).await.unwrap();

    let stored = repo.get(1).await.unwrap();
    assert_eq!(stored.last_ping_status, PingStatus::Online);
    assert_eq!(stored.status, DeviceStatus::Online);
    assert!(stored.last_ping_attempt.is_some());
    assert!(stored.last_pinged.is_some());
    assert!(stored.last_ping_duration_ms.is_some());

    let first = events.try_recv().unwrap();
    assert_eq!(
        first.kind,
        HeartbeatEventKind::StatusChanged {
            from: PingStatus::Offline,
            to: PingStatus::Online
        }
    );
    let second = events.try_recv().unwrap();
    assert_eq!(
        second.kind,
        HeartbeatEventKind::ConnectivityChanged {
            from: DeviceStatus::Offline,
            to: DeviceStatus::Online
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_interval_gates_second_tick() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let repo = Arc::new(MemoryRepository::with_devices([http_device(1, &server)]));
    let mut scheduler = scheduler(repo);
    let cancel = CancellationToken::new();

    scheduler.tick(&cancel).await.unwrap();
    // default interval is a minute, so the device is not due again
    scheduler.tick(&cancel).await.unwrap();
}

#[tokio::test]
async fn test_retry_budget_exhaustion_takes_device_offline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut device = http_device(1, &server);
    device.heartbeat_interval_ms = 0;
    device.heartbeat_max_retry_attempts = Some(3);

    let repo = Arc::new(MemoryRepository::with_devices([device]));
    let mut scheduler = scheduler(repo.clone());
    scheduler.reset_all_offline().await.unwrap();
    let cancel = CancellationToken::new();

    let mut seen = Vec::new();
    for _ in 0..3 {
        scheduler.tick(&cancel).await.unwrap();
        seen.push(repo.get(1).await.unwrap().last_ping_status);
    }
    assert_eq!(
        seen,
        vec![PingStatus::Testing, PingStatus::Retesting, PingStatus::Offline]
    );
    assert_eq!(scheduler.failures().get(1), 3);

    // budget exhausted and grace period not over: no further probes
    scheduler.tick(&cancel).await.unwrap();
    let stored = repo.get(1).await.unwrap();
    assert_eq!(stored.last_ping_status, PingStatus::Offline);
    assert_eq!(stored.status, DeviceStatus::Offline);
    assert_eq!(stored.consecutive_ping_failures, 3);
}

#[tokio::test]
async fn test_grace_period_reactivates_before_probing() {
    let server = healthy_server().await;
    let mut device = http_device(1, &server);
    device.heartbeat_max_retry_attempts = Some(3);
    device.heartbeat_grace_period_ms = 60_000;

    let repo = Arc::new(MemoryRepository::with_devices([device]));
    let mut scheduler = scheduler(repo.clone());
    scheduler.reset_all_offline().await.unwrap();

    let mut exhausted = repo.get(1).await.unwrap();
    exhausted.last_ping_attempt = Some(Utc::now() - ChronoDuration::milliseconds(61_000));
    exhausted.consecutive_ping_failures = 3;
    repo.update_device(1, &exhausted).await.unwrap();
    for _ in 0..3 {
        scheduler.failures().record(1, false);
    }

    let mut events = scheduler.subscribe();
    scheduler.tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        events.try_recv().unwrap().kind,
        HeartbeatEventKind::StatusChanged {
            from: PingStatus::Offline,
            to: PingStatus::Testing
        }
    );
    assert_eq!(
        events.try_recv().unwrap().kind,
        HeartbeatEventKind::StatusChanged {
            from: PingStatus::Testing,
            to: PingStatus::Online
        }
    );

    let stored = repo.get(1).await.unwrap();
    assert_eq!(stored.last_ping_status, PingStatus::Online);
    assert_eq!(scheduler.failures().get(1), 0);
}

#[tokio::test]
async fn test_grace_period_not_over_keeps_device_parked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut device = http_device(1, &server);
    device.heartbeat_max_retry_attempts = Some(3);
    device.heartbeat_grace_period_ms = 60_000;

    let repo = Arc::new(MemoryRepository::with_devices([device]));
    let mut scheduler = scheduler(repo.clone());
    scheduler.reset_all_offline().await.unwrap();

    let mut exhausted = repo.get(1).await.unwrap();
    exhausted.last_ping_attempt = Some(Utc::now() - ChronoDuration::milliseconds(5_000));
    repo.update_device(1, &exhausted).await.unwrap();
    for _ in 0..3 {
        scheduler.failures().record(1, false);
    }

    scheduler.tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(scheduler.failures().get(1), 3);
    assert_eq!(repo.get(1).await.unwrap().last_ping_status, PingStatus::Offline);
}

#[tokio::test]
async fn test_handle_waits_for_repository() {
    let server = healthy_server().await;
    let repo = Arc::new(MemoryRepository::pending());
    repo.upsert_device(&http_device(1, &server)).await.unwrap();

    let handle = SchedulerHandle::spawn(scheduler(repo.clone()));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(handle.is_running());
    assert!(repo.get(1).await.unwrap().last_ping_attempt.is_none());

    repo.mark_ready();
    let mut probed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if repo.get(1).await.unwrap().last_ping_status == PingStatus::Online {
            probed = true;
            break;
        }
    }
    assert!(probed, "device should be probed once the repository is ready");

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_probe_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let repo = Arc::new(MemoryRepository::with_devices([http_device(1, &server)]));
    let scheduler = heartbeat_monitor::heartbeat::HeartbeatScheduler::new(
        repo.clone(),
        heartbeat_monitor::probes::ProbeExecutor::new(&heartbeat_monitor::config::ProbeConfig {
            http_timeout_ms: 30_000,
            ..Default::default()
        })
        .unwrap(),
        &fast_scheduler_config(),
    );
    let handle = SchedulerHandle::spawn(scheduler);

    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::time::timeout(Duration::from_secs(2), handle.stop())
        .await
        .expect("stop should not wait for the in-flight probe")
        .unwrap();

    let stored = repo.get(1).await.unwrap();
    assert!(stored.last_ping_attempt.is_none());
    assert_eq!(stored.last_ping_status, PingStatus::Offline);
}

#[tokio::test]
async fn test_config_edit_during_probe_survives_write_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HEALTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let repo = Arc::new(MemoryRepository::with_devices([http_device(1, &server)]));
    let mut scheduler = scheduler(repo.clone());
    scheduler.reset_all_offline().await.unwrap();

    let edit = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut edited = http_device(1, &server);
        edited.name = "Renamed panel".to_string();
        edited.heartbeat_enabled = false;
        edited.heartbeat_interval_ms = 5_000;
        repo.upsert_device(&edited).await.unwrap();
    };

    let cancel = CancellationToken::new();
    let (ticked, ()) = tokio::join!(scheduler.tick(&cancel), edit);
    ticked.unwrap();

    let stored = repo.get(1).await.unwrap();
    assert_eq!(stored.name, "Renamed panel");
    assert!(!stored.heartbeat_enabled);
    assert_eq!(stored.heartbeat_interval_ms, 5_000);
    assert_eq!(stored.last_ping_status, PingStatus::Online);
    assert_eq!(stored.status, DeviceStatus::Online);
    assert!(stored.last_pinged.is_some());
}
