//! Settings store - single source of truth
//!
//! ## Responsibilities
//!
//! - Durable camera records keyed by UID
//! - Scalar system settings
//! - Append-only operational log
//!
//! ## Design
//!
//! All desired state lives here; no other component carries it across a
//! tick. A database that fails to open or to pass the schema check maps to
//! the `Corruption` error kind, which is fatal at startup.

mod repository;
mod types;

pub use repository::SettingsRepository;
pub use types::*;

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Settings keys for the singleton system configuration.
pub mod keys {
    pub const CPU_THRESHOLD: &str = "cpu_threshold";
    pub const MOONRAKER_URL: &str = "moonraker_url";
    pub const LOG_LEVEL: &str = "log_level";
    pub const BASE_HOST: &str = "base_host";
    pub const MOONRAKER_SERVICE: &str = "moonraker_service";
}

/// Store handle shared between the reconciler and the admin surface.
#[derive(Clone)]
pub struct SettingsStore {
    repository: SettingsRepository,
}

impl SettingsStore {
    /// Open (or create) the database file and verify the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| Error::Corruption(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| Error::Corruption(format!("failed to open settings store: {e}")))?;

        Self::from_pool(pool).await
    }

    /// In-memory store for tests. A single connection keeps all reads and
    /// writes on the same database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Corruption(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::Corruption(format!("failed to open in-memory store: {e}")))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: sqlx::SqlitePool) -> Result<Self> {
        let repository = SettingsRepository::new(pool);

        repository
            .init_schema()
            .await
            .map_err(|e| Error::Corruption(format!("schema initialization failed: {e}")))?;

        // Distinguish a corrupt file from an empty one before serving traffic
        repository
            .list()
            .await
            .map_err(|e| Error::Corruption(format!("schema check failed: {e}")))?;

        Ok(Self { repository })
    }

    pub async fn get(&self, uid: &str) -> Result<Option<CameraRecord>> {
        self.repository.get(uid).await
    }

    pub async fn list(&self) -> Result<Vec<CameraRecord>> {
        self.repository.list().await
    }

    pub async fn upsert(&self, record: &CameraRecord) -> Result<()> {
        self.repository.upsert(record).await
    }

    pub async fn delete(&self, uid: &str) -> Result<bool> {
        self.repository.delete(uid).await
    }

    pub async fn mark_all_disconnected(&self) -> Result<()> {
        self.repository.mark_all_disconnected().await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.repository.get_setting(key).await
    }

    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.repository.set_setting(key, value).await
    }

    pub async fn append_log(
        &self,
        level: &str,
        camera_uid: Option<&str>,
        message: &str,
    ) -> Result<()> {
        self.repository.append_log(level, camera_uid, message).await
    }

    pub async fn logs(&self, limit: i64) -> Result<Vec<LogEntry>> {
        self.repository.logs(limit).await
    }

    /// Assemble the singleton system settings, filling gaps with defaults.
    pub async fn system_settings(&self) -> Result<SystemSettings> {
        let mut settings = SystemSettings::default();

        if let Some(value) = self.get_setting(keys::CPU_THRESHOLD).await? {
            if let Some(threshold) = value.as_u64() {
                settings.cpu_threshold = threshold.min(100) as u8;
            }
        }
        if let Some(value) = self.get_setting(keys::MOONRAKER_URL).await? {
            if let Some(url) = value.as_str() {
                settings.moonraker_url = url.to_string();
            }
        }
        if let Some(value) = self.get_setting(keys::LOG_LEVEL).await? {
            if let Some(level) = value.as_str() {
                settings.log_level = level.to_string();
            }
        }
        if let Some(value) = self.get_setting(keys::BASE_HOST).await? {
            if let Some(host) = value.as_str() {
                settings.base_host = Some(host.to_string());
            }
        }
        if let Some(value) = self.get_setting(keys::MOONRAKER_SERVICE).await? {
            if let Some(service) = value.as_str() {
                settings.moonraker_service = service.to_string();
            }
        }

        Ok(settings)
    }
}
