//! Tests for bounded parallel probing

use std::sync::Arc;
use std::time::{Duration, Instant};

use heartbeat_monitor::{
    config::SchedulerConfig,
    heartbeat::{FailureCounterStore, HeartbeatScheduler},
    storage::{DeviceRepository, MemoryRepository},
    PingStatus,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_tick_respects_concurrency_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .expect(12)
        .mount(&server)
        .await;

    let repo = Arc::new(MemoryRepository::with_devices(
        (1..=12).map(|id| http_device(id, &server)),
    ));
    let config = SchedulerConfig {
        tick_interval_ms: 1_000,
        max_concurrent_probes: 3,
        min_delay_between_starts_ms: 0,
    };
    let mut scheduler = HeartbeatScheduler::new(repo.clone(), executor(), &config);

    let start = Instant::now();
    scheduler.tick(&CancellationToken::new()).await.unwrap();
    let elapsed = start.elapsed();

    // 12 probes in waves of 3 cannot finish faster than 4 delays
    assert!(elapsed >= Duration::from_millis(380), "took {elapsed:?}");

    let devices = repo.list_devices().await.unwrap();
    assert!(devices.iter().all(|d| d.last_ping_status == PingStatus::Online));
}

#[tokio::test]
async fn test_probe_starts_are_paced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let repo = Arc::new(MemoryRepository::with_devices(
        (1..=5).map(|id| http_device(id, &server)),
    ));
    let config = SchedulerConfig {
        tick_interval_ms: 1_000,
        max_concurrent_probes: 5,
        min_delay_between_starts_ms: 50,
    };
    let mut scheduler = HeartbeatScheduler::new(repo.clone(), executor(), &config);

    let start = Instant::now();
    scheduler.tick(&CancellationToken::new()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));

    let mut attempts: Vec<_> = repo
        .list_devices()
        .await
        .unwrap()
        .into_iter()
        .map(|d| (d.last_ping_attempt.unwrap(), d.id))
        .collect();
    attempts.sort();
    let order: Vec<_> = attempts.into_iter().map(|(_, id)| id).collect();
    assert_eq!(order, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_failure_store_under_parallel_writers() {
    let store = FailureCounterStore::new();
    let mut tasks = Vec::new();

    for id in 0..10 {
        for _ in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move { store.record(id, false) }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }

    for id in 0..10 {
        assert_eq!(store.get(id), 50);
    }
}
