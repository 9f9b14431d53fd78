//! Application state
//!
//! Configuration is read from the environment exactly once at startup and
//! injected everywhere as a value; no module-level mutable state.

use crate::device::DeviceInspector;
use crate::hardware::HardwareProbe;
use crate::ingress::IngressMode;
use crate::reconciler::{BackendHealth, ReconcilerHandle};
use crate::settings_store::SettingsStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Installation directory (`CAMWARDEN_DIR`)
    pub base_dir: PathBuf,
    /// Settings database file
    pub database_path: PathBuf,
    /// MediaMTX control API
    pub mediamtx_url: String,
    /// RTSP ingest root rendered into transcoder commands
    pub rtsp_base: String,
    /// Moonraker API, unless overridden by a stored setting
    pub moonraker_url: String,
    /// Admin API bind address
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let base_dir = std::env::var("CAMWARDEN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(|home| PathBuf::from(home).join("camwarden"))
                    .unwrap_or_else(|_| PathBuf::from("/var/lib/camwarden"))
            });

        let database_path = base_dir.join("data").join("camwarden.db");

        Self {
            base_dir,
            database_path,
            mediamtx_url: std::env::var("CAMWARDEN_MEDIAMTX_URL")
                .unwrap_or_else(|_| crate::mediamtx::DEFAULT_API_BASE.to_string()),
            rtsp_base: std::env::var("CAMWARDEN_RTSP_BASE")
                .unwrap_or_else(|_| crate::mediamtx::RTSP_INGEST_BASE.to_string()),
            moonraker_url: std::env::var("CAMWARDEN_MOONRAKER_URL")
                .unwrap_or_else(|_| crate::moonraker::DEFAULT_API_BASE.to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8585),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: SettingsStore,
    pub probe: HardwareProbe,
    pub reconciler: ReconcilerHandle,
    /// Backend liveness as of the last tick
    pub health: Arc<RwLock<BackendHealth>>,
    pub inspector: Arc<dyn DeviceInspector>,
    pub ingress_mode: IngressMode,
}
