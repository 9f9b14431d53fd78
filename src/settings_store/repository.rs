//! Settings store repository
//!
//! Database access layer. All statements are plain parameterized SQL so the
//! schema and queries live together in this file.

use super::types::{CameraRecord, CameraRow, LogEntry};
use crate::error::Result;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema idempotently.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cameras (
                uid TEXT PRIMARY KEY,
                device_path TEXT,
                hardware_name TEXT NOT NULL,
                friendly_name TEXT NOT NULL,
                vendor_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                serial TEXT,
                bus_path TEXT NOT NULL,
                capabilities TEXT NOT NULL DEFAULT '{}',
                format TEXT NOT NULL DEFAULT 'mjpeg',
                resolution TEXT NOT NULL DEFAULT '1280x720',
                framerate INTEGER NOT NULL DEFAULT 30,
                bitrate TEXT NOT NULL DEFAULT '4M',
                rotation INTEGER NOT NULL DEFAULT 0,
                encoder TEXT NOT NULL DEFAULT 'software',
                input_format TEXT,
                controls TEXT NOT NULL DEFAULT '{}',
                overlay_path TEXT,
                moonraker_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                connected BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                level TEXT NOT NULL,
                camera_uid TEXT,
                message TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cameras_connected ON cameras(connected)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_ts ON logs(ts DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    const CAMERA_COLUMNS: &'static str = r#"
        uid, device_path, hardware_name, friendly_name,
        vendor_id, product_id, serial, bus_path,
        capabilities, format, resolution, framerate, bitrate, rotation,
        encoder, input_format, controls, overlay_path,
        moonraker_enabled, enabled, connected,
        created_at, updated_at
    "#;

    pub async fn get(&self, uid: &str) -> Result<Option<CameraRecord>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE uid = ?",
            Self::CAMERA_COLUMNS
        );
        let row = sqlx::query_as::<_, CameraRow>(&query)
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(CameraRecord::from))
    }

    pub async fn list(&self) -> Result<Vec<CameraRecord>> {
        let query = format!(
            "SELECT {} FROM cameras ORDER BY connected DESC, friendly_name",
            Self::CAMERA_COLUMNS
        );
        let rows = sqlx::query_as::<_, CameraRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(CameraRecord::from).collect())
    }

    /// Insert or fully replace a record. `created_at` survives conflicts.
    pub async fn upsert(&self, record: &CameraRecord) -> Result<()> {
        let capabilities = serde_json::to_string(&record.capabilities)?;
        let controls = serde_json::to_string(&record.controls)?;

        sqlx::query(
            r#"
            INSERT INTO cameras (
                uid, device_path, hardware_name, friendly_name,
                vendor_id, product_id, serial, bus_path,
                capabilities, format, resolution, framerate, bitrate, rotation,
                encoder, input_format, controls, overlay_path,
                moonraker_enabled, enabled, connected,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(uid) DO UPDATE SET
                device_path = excluded.device_path,
                hardware_name = excluded.hardware_name,
                friendly_name = excluded.friendly_name,
                vendor_id = excluded.vendor_id,
                product_id = excluded.product_id,
                serial = excluded.serial,
                bus_path = excluded.bus_path,
                capabilities = excluded.capabilities,
                format = excluded.format,
                resolution = excluded.resolution,
                framerate = excluded.framerate,
                bitrate = excluded.bitrate,
                rotation = excluded.rotation,
                encoder = excluded.encoder,
                input_format = excluded.input_format,
                controls = excluded.controls,
                overlay_path = excluded.overlay_path,
                moonraker_enabled = excluded.moonraker_enabled,
                enabled = excluded.enabled,
                connected = excluded.connected,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.uid)
        .bind(&record.device_path)
        .bind(&record.hardware_name)
        .bind(&record.friendly_name)
        .bind(&record.fingerprint.vendor_id)
        .bind(&record.fingerprint.product_id)
        .bind(&record.fingerprint.serial)
        .bind(&record.fingerprint.bus_path)
        .bind(&capabilities)
        .bind(&record.format)
        .bind(&record.resolution)
        .bind(record.framerate as i64)
        .bind(&record.bitrate)
        .bind(record.rotation as i64)
        .bind(record.encoder.as_str())
        .bind(&record.input_format)
        .bind(&controls)
        .bind(&record.overlay_path)
        .bind(record.moonraker_enabled)
        .bind(record.enabled)
        .bind(record.connected)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, uid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cameras WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Startup reset: observed attachment state is rebuilt from live events.
    pub async fn mark_all_disconnected(&self) -> Result<()> {
        sqlx::query(
            "UPDATE cameras SET connected = FALSE, device_path = NULL WHERE connected = TRUE",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|(value,)| serde_json::from_str(&value).ok()))
    }

    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn append_log(
        &self,
        level: &str,
        camera_uid: Option<&str>,
        message: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO logs (ts, level, camera_uid, message) VALUES (?, ?, ?, ?)")
            .bind(chrono::Utc::now())
            .bind(level)
            .bind(camera_uid)
            .bind(message)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        let entries = sqlx::query_as::<_, LogEntry>(
            "SELECT id, ts, level, camera_uid, message FROM logs ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
