use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::device::Device;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory device registry (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./devices.db")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Devices to register at boot
    pub devices: Option<Vec<Device>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock cadence of the scheduler loop
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    #[serde(default = "default_min_delay_between_starts_ms")]
    pub min_delay_between_starts_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrent_probes: default_max_concurrent_probes(),
            min_delay_between_starts_ms: default_min_delay_between_starts_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn min_delay_between_starts(&self) -> Duration {
        Duration::from_millis(self.min_delay_between_starts_ms)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default = "default_icmp_timeout_ms")]
    pub icmp_timeout_ms: u64,

    /// Path requested when a device has no explicit HTTP target
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_http_timeout_ms(),
            icmp_timeout_ms: default_icmp_timeout_ms(),
            health_path: default_health_path(),
        }
    }
}

impl ProbeConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn icmp_timeout(&self) -> Duration {
        Duration::from_millis(self.icmp_timeout_ms)
    }
}

fn default_tick_interval_ms() -> u64 {
    10_000
}

fn default_max_concurrent_probes() -> usize {
    5
}

fn default_min_delay_between_starts_ms() -> u64 {
    100
}

fn default_http_timeout_ms() -> u64 {
    5_000
}

fn default_icmp_timeout_ms() -> u64 {
    2_000
}

fn default_health_path() -> String {
    String::from("/api/health/heartbeat")
}

impl Config {
    /// Apply `HEARTBEAT_*` environment overrides on top of the file values
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(tick) = crate::util::get_tick_interval_ms() {
            self.scheduler.tick_interval_ms = tick;
        }
        if let Some(concurrency) = crate::util::get_max_concurrency() {
            self.scheduler.max_concurrent_probes = concurrency;
        }
        if let Some(delay) = crate::util::get_start_delay_ms() {
            self.scheduler.min_delay_between_starts_ms = delay;
        }
        if let Some(path) = crate::util::get_db_path() {
            self.storage = Some(StorageConfig::Sqlite { path });
        }
        self
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
