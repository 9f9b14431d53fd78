//! Settings store data types

use crate::device::Fingerprint;
use crate::hardware::{CapabilityMap, Encoder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Authoritative per-camera row. The store is the single source of truth
/// for desired state; nothing else holds these fields across a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecord {
    pub uid: String,
    /// Current kernel node; absent while detached
    pub device_path: Option<String>,
    pub hardware_name: String,
    pub friendly_name: String,
    pub fingerprint: Fingerprint,
    /// Last-known capability map; never regresses to empty
    pub capabilities: CapabilityMap,
    pub format: String,
    pub resolution: String,
    pub framerate: u32,
    pub bitrate: String,
    pub rotation: u16,
    pub encoder: Encoder,
    /// Explicit transcoder input format, overriding the mapped `format`
    pub input_format: Option<String>,
    /// V4L2 control name -> value, applied before streaming starts
    pub controls: BTreeMap<String, i64>,
    /// Print-status overlay text file, authored externally
    pub overlay_path: Option<String>,
    pub moonraker_enabled: bool,
    pub enabled: bool,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CameraRecord {
    /// Fresh record for a first-seen fingerprint, before profile selection.
    pub fn new(
        uid: String,
        fingerprint: Fingerprint,
        hardware_name: String,
        device_path: Option<String>,
        capabilities: CapabilityMap,
    ) -> Self {
        let now = Utc::now();
        Self {
            uid,
            device_path,
            friendly_name: hardware_name.clone(),
            hardware_name,
            fingerprint,
            capabilities,
            format: "mjpeg".to_string(),
            resolution: "1280x720".to_string(),
            framerate: 30,
            bitrate: "4M".to_string(),
            rotation: 0,
            encoder: Encoder::Software,
            input_format: None,
            controls: BTreeMap::new(),
            overlay_path: None,
            moonraker_enabled: true,
            enabled: true,
            connected: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update from the administrative surface. Absent fields are left
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCameraRequest {
    pub friendly_name: Option<String>,
    pub format: Option<String>,
    pub resolution: Option<String>,
    pub framerate: Option<u32>,
    pub bitrate: Option<String>,
    pub rotation: Option<u16>,
    pub encoder: Option<Encoder>,
    pub input_format: Option<String>,
    pub controls: Option<BTreeMap<String, i64>>,
    pub overlay_path: Option<String>,
    pub moonraker_enabled: Option<bool>,
    pub enabled: Option<bool>,
}

/// Entry in the append-only operational log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogEntry {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub level: String,
    pub camera_uid: Option<String>,
    pub message: String,
}

/// Singleton system settings, stored as scalar rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// CPU threshold percent used by the admin surface for warnings
    pub cpu_threshold: u8,
    pub moonraker_url: String,
    pub log_level: String,
    /// Host rendered into stream/snapshot URLs; None means loopback
    pub base_host: Option<String>,
    /// `webrtc-mediamtx` or `hlsstream`
    pub moonraker_service: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            cpu_threshold: 30,
            moonraker_url: "http://127.0.0.1:7125".to_string(),
            log_level: "info".to_string(),
            base_host: None,
            moonraker_service: "webrtc-mediamtx".to_string(),
        }
    }
}

/// Database row shape; JSON columns are TEXT and parsed on the way out.
#[derive(Debug, FromRow)]
pub(crate) struct CameraRow {
    pub uid: String,
    pub device_path: Option<String>,
    pub hardware_name: String,
    pub friendly_name: String,
    pub vendor_id: String,
    pub product_id: String,
    pub serial: Option<String>,
    pub bus_path: String,
    pub capabilities: String,
    pub format: String,
    pub resolution: String,
    pub framerate: i64,
    pub bitrate: String,
    pub rotation: i64,
    pub encoder: String,
    pub input_format: Option<String>,
    pub controls: String,
    pub overlay_path: Option<String>,
    pub moonraker_enabled: bool,
    pub enabled: bool,
    pub connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CameraRow> for CameraRecord {
    fn from(row: CameraRow) -> Self {
        let capabilities: CapabilityMap =
            serde_json::from_str(&row.capabilities).unwrap_or_default();
        let controls: BTreeMap<String, i64> =
            serde_json::from_str(&row.controls).unwrap_or_default();

        Self {
            uid: row.uid,
            device_path: row.device_path,
            hardware_name: row.hardware_name,
            friendly_name: row.friendly_name,
            fingerprint: Fingerprint {
                vendor_id: row.vendor_id,
                product_id: row.product_id,
                serial: row.serial,
                bus_path: row.bus_path,
            },
            capabilities,
            format: row.format,
            resolution: row.resolution,
            framerate: row.framerate.max(1) as u32,
            bitrate: row.bitrate,
            rotation: row.rotation.clamp(0, 270) as u16,
            encoder: Encoder::parse(&row.encoder).unwrap_or(Encoder::Software),
            input_format: row.input_format,
            controls,
            overlay_path: row.overlay_path,
            moonraker_enabled: row.moonraker_enabled,
            enabled: row.enabled,
            connected: row.connected,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
