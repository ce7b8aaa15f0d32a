//! SQLite device repository
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Probe write-backs do not block device listing
//! - **Migrations**: Schema versioning with sqlx

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::DeviceRepository;
use super::error::{StorageError, StorageResult};
use crate::device::{Device, DeviceId, DeviceStatus, HeartbeatProtocol, PingStatus};

const SELECT_DEVICES: &str = r#"
    SELECT id, name, ip_address, unique_identifier,
           heartbeat_enabled, heartbeat_protocol, heartbeat_target,
           heartbeat_interval_ms, heartbeat_max_retry_attempts,
           heartbeat_grace_period_ms, heartbeat_expected_value,
           last_ping_attempt, last_pinged, last_ping_status,
           last_ping_duration_ms, consecutive_ping_failures, status
    FROM devices
    ORDER BY id ASC
"#;

/// SQLite-backed device registry
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteRepository {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ```no_run
    /// # use heartbeat_monitor::storage::sqlite::SqliteRepository;
    /// # async fn example() -> anyhow::Result<()> {
    /// let repo = SqliteRepository::new("./devices.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("opening device database at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
    }

    fn row_to_device(row: &SqliteRow) -> StorageResult<Device> {
        let protocol: String = row.try_get("heartbeat_protocol")?;
        let heartbeat_protocol = protocol
            .parse::<HeartbeatProtocol>()
            .map_err(StorageError::SerializationError)?;

        let last_ping_status: String = row.try_get("last_ping_status")?;
        let status: String = row.try_get("status")?;

        Ok(Device {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            ip_address: row.try_get("ip_address")?,
            unique_identifier: row.try_get("unique_identifier")?,
            heartbeat_enabled: row.try_get("heartbeat_enabled")?,
            heartbeat_protocol,
            heartbeat_target: row.try_get("heartbeat_target")?,
            heartbeat_interval_ms: column_u64(row, "heartbeat_interval_ms")?,
            heartbeat_max_retry_attempts: row
                .try_get::<Option<i64>, _>("heartbeat_max_retry_attempts")?
                .map(|v| checked_u32("heartbeat_max_retry_attempts", v))
                .transpose()?,
            heartbeat_grace_period_ms: column_u64(row, "heartbeat_grace_period_ms")?,
            heartbeat_expected_value: row.try_get("heartbeat_expected_value")?,
            last_ping_attempt: row
                .try_get::<Option<i64>, _>("last_ping_attempt")?
                .and_then(Self::millis_to_timestamp),
            last_pinged: row
                .try_get::<Option<i64>, _>("last_pinged")?
                .and_then(Self::millis_to_timestamp),
            last_ping_status: PingStatus::parse_lossy(&last_ping_status),
            last_ping_duration_ms: row
                .try_get::<Option<i64>, _>("last_ping_duration_ms")?
                .map(|v| checked_u64("last_ping_duration_ms", v))
                .transpose()?,
            consecutive_ping_failures: checked_u32(
                "consecutive_ping_failures",
                row.try_get("consecutive_ping_failures")?,
            )?,
            status: DeviceStatus::parse_lossy(&status),
        })
    }
}

fn checked_u32(column: &str, value: i64) -> StorageResult<u32> {
    u32::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{column} out of range: {value}"))
    })
}

fn checked_u64(column: &str, value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{column} out of range: {value}"))
    })
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn column_u64(row: &SqliteRow, column: &str) -> StorageResult<u64> {
    checked_u64(column, row.try_get(column)?)
}

#[async_trait]
impl DeviceRepository for SqliteRepository {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> StorageResult<Vec<Device>> {
        let rows = sqlx::query(SELECT_DEVICES).fetch_all(&self.pool).await?;

        let devices = rows
            .iter()
            .map(Self::row_to_device)
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("loaded {} devices", devices.len());
        Ok(devices)
    }

    #[instrument(skip(self, device))]
    async fn update_device(&self, id: DeviceId, device: &Device) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET
                last_ping_attempt = ?, last_pinged = ?, last_ping_status = ?,
                last_ping_duration_ms = ?, consecutive_ping_failures = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(device.last_ping_attempt.as_ref().map(Self::timestamp_to_millis))
        .bind(device.last_pinged.as_ref().map(Self::timestamp_to_millis))
        .bind(device.last_ping_status.as_str())
        .bind(device.last_ping_duration_ms.map(saturating_i64))
        .bind(i64::from(device.consecutive_ping_failures))
        .bind(device.status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, device), fields(device_id = device.id))]
    async fn upsert_device(&self, device: &Device) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (
                id, name, ip_address, unique_identifier,
                heartbeat_enabled, heartbeat_protocol, heartbeat_target,
                heartbeat_interval_ms, heartbeat_max_retry_attempts,
                heartbeat_grace_period_ms, heartbeat_expected_value,
                last_ping_attempt, last_pinged, last_ping_status,
                last_ping_duration_ms, consecutive_ping_failures, status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                ip_address = excluded.ip_address,
                unique_identifier = excluded.unique_identifier,
                heartbeat_enabled = excluded.heartbeat_enabled,
                heartbeat_protocol = excluded.heartbeat_protocol,
                heartbeat_target = excluded.heartbeat_target,
                heartbeat_interval_ms = excluded.heartbeat_interval_ms,
                heartbeat_max_retry_attempts = excluded.heartbeat_max_retry_attempts,
                heartbeat_grace_period_ms = excluded.heartbeat_grace_period_ms,
                heartbeat_expected_value = excluded.heartbeat_expected_value
            "#,
        )
        .bind(device.id)
        .bind(&device.name)
        .bind(&device.ip_address)
        .bind(&device.unique_identifier)
        .bind(device.heartbeat_enabled)
        .bind(device.heartbeat_protocol.to_string())
        .bind(&device.heartbeat_target)
        .bind(saturating_i64(device.heartbeat_interval_ms))
        .bind(device.heartbeat_max_retry_attempts.map(i64::from))
        .bind(saturating_i64(device.heartbeat_grace_period_ms))
        .bind(&device.heartbeat_expected_value)
        .bind(device.last_ping_attempt.as_ref().map(Self::timestamp_to_millis))
        .bind(device.last_pinged.as_ref().map(Self::timestamp_to_millis))
        .bind(device.last_ping_status.as_str())
        .bind(device.last_ping_duration_ms.map(saturating_i64))
        .bind(i64::from(device.consecutive_ping_failures))
        .bind(device.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
