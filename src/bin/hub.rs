use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use heartbeat_monitor::{
    config::{Config, StorageConfig, read_config_file},
    heartbeat::{HeartbeatEventKind, HeartbeatScheduler, SchedulerHandle},
    storage::{DeviceRepository, MemoryRepository},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("heartbeat_monitor", LevelFilter::DEBUG),
        ("heartbeat_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?.apply_env_overrides();

    let repository = open_repository(&config).await?;
    seed_devices(repository.as_ref(), &config).await?;

    let scheduler = HeartbeatScheduler::from_config(repository, &config)?;
    let events = scheduler.subscribe();
    let handle = SchedulerHandle::spawn(scheduler);

    tokio::spawn(log_events(events));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, stopping heartbeat scheduler");

    handle.stop().await
}

async fn open_repository(config: &Config) -> anyhow::Result<Arc<dyn DeviceRepository>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory device registry");
            Ok(Arc::new(MemoryRepository::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let repository = heartbeat_monitor::storage::sqlite::SqliteRepository::new(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Arc::new(repository))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { path } => {
            warn!(
                "sqlite storage at {} requested but not compiled in, using in-memory registry",
                path.display()
            );
            Ok(Arc::new(MemoryRepository::new()))
        }
    }
}

async fn seed_devices(repository: &dyn DeviceRepository, config: &Config) -> anyhow::Result<()> {
    let Some(devices) = &config.devices else {
        return Ok(());
    };

    for device in devices {
        repository
            .upsert_device(device)
            .await
            .with_context(|| format!("failed to register device {}", device.id))?;
    }

    debug!("registered {} devices from config", devices.len());
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<heartbeat_monitor::heartbeat::HeartbeatEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let HeartbeatEventKind::ConnectivityChanged { to, .. } = event.kind {
                    info!("{} ({}) is now {to}", event.device_name, event.device_id);
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("event log lagged, skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
