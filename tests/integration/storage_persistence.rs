//! Heartbeat results written through the SQLite repository

use std::sync::Arc;

use heartbeat_monitor::{
    storage::{DeviceRepository, sqlite::SqliteRepository},
    DeviceStatus, PingStatus,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_probe_results_survive_reopen() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(HEALTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(heartbeat_json("AA:BB:CC")))
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("devices.db");

    {
        let repo = Arc::new(SqliteRepository::new(&db_path).await.unwrap());
        let mut device = http_device(1, &server);
        device.unique_identifier = Some("aa:bb:cc".to_string());
        repo.upsert_device(&device).await.unwrap();

        let mut scheduler = scheduler(repo);
        scheduler.tick(&CancellationToken::new()).await.unwrap();
    }

    let reopened = SqliteRepository::new(&db_path).await.unwrap();
    let stored = reopened.list_devices().await.unwrap().remove(0);
    assert_eq!(stored.last_ping_status, PingStatus::Online);
    assert_eq!(stored.status, DeviceStatus::Online);
    assert!(stored.last_pinged.is_some());
    assert_eq!(stored.consecutive_ping_failures, 0);
}

#[tokio::test]
async fn test_restart_resets_persisted_state() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("devices.db");
    let server = MockServer::start().await;

    let repo = Arc::new(SqliteRepository::new(&db_path).await.unwrap());
    let mut device = http_device(1, &server);
    repo.upsert_device(&device).await.unwrap();
    device.last_ping_status = PingStatus::Unstable;
    device.status = DeviceStatus::Online;
    device.consecutive_ping_failures = 2;
    repo.update_device(1, &device).await.unwrap();

    let mut scheduler = scheduler(repo.clone());
    assert_eq!(scheduler.reset_all_offline().await.unwrap(), 1);

    let stored = repo.list_devices().await.unwrap().remove(0);
    assert_eq!(stored.last_ping_status, PingStatus::Offline);
    assert_eq!(stored.status, DeviceStatus::Offline);
    assert_eq!(stored.consecutive_ping_failures, 0);
}
