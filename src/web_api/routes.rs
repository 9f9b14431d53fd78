//! API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::hardware::Encoder;
use crate::models::{ApiResponse, SystemStatus};
use crate::profile::{self, Overrides};
use crate::settings_store::{CameraRecord, UpdateCameraRequest};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(super::health_check))
        // Cameras
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/:uid", get(get_camera))
        .route("/api/cameras/:uid", put(update_camera))
        .route("/api/cameras/:uid", delete(delete_camera))
        // Manual device registration
        .route("/api/devices", post(add_device))
        // Reconciliation & status
        .route("/api/reconcile", post(force_reconcile))
        .route("/api/status", get(system_status))
        .route("/api/logs", get(list_logs))
        .with_state(state)
}

// ========================================
// Camera handlers
// ========================================

async fn list_cameras(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.store.list().await?;
    Ok(Json(ApiResponse::success(cameras)))
}

async fn get_camera(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse> {
    let camera = state
        .store
        .get(&uid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("camera {uid}")))?;

    Ok(Json(ApiResponse::success(camera)))
}

async fn update_camera(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(req): Json<UpdateCameraRequest>,
) -> Result<impl IntoResponse> {
    let mut record = state
        .store
        .get(&uid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("camera {uid}")))?;

    // Invalid overrides are rejected before anything is written
    validate_update(&state, &record, &req)?;

    apply_update(&mut record, req);
    record.updated_at = chrono::Utc::now();
    state.store.upsert(&record).await?;

    let report = state.reconciler.reconcile().await;
    Ok(Json(ApiResponse::converged(record, report.sync_errors)))
}

async fn delete_camera(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse> {
    if !state.store.delete(&uid).await? {
        return Err(Error::NotFound(format!("camera {uid}")));
    }
    state
        .store
        .append_log("info", Some(&uid), "camera deleted")
        .await?;

    // The record is gone, so convergence cascades the deletion to both
    // backends before we answer
    let report = state.reconciler.reconcile().await;
    Ok(Json(ApiResponse::converged(uid, report.sync_errors)))
}

fn validate_update(
    state: &AppState,
    record: &CameraRecord,
    req: &UpdateCameraRequest,
) -> Result<()> {
    if let Some(rotation) = req.rotation {
        if !matches!(rotation, 0 | 90 | 180 | 270) {
            return Err(Error::BadRequest(format!("invalid rotation {rotation}")));
        }
    }

    if let Some(encoder) = req.encoder {
        if encoder != Encoder::Software && !state.probe.encoders.has(encoder) {
            return Err(Error::BadRequest(format!(
                "encoder {} not available on this host",
                encoder.as_str()
            )));
        }
    }

    // Capability checks only bind when the capability map is known
    if record.capabilities.is_empty() {
        return Ok(());
    }

    let format = req.format.as_deref().unwrap_or(&record.format);
    if let Some(wanted) = &req.format {
        if !record.capabilities.contains_key(wanted) {
            return Err(Error::BadRequest(format!(
                "format {wanted} not advertised by this camera"
            )));
        }
    }

    let sizes = record.capabilities.get(format);
    let resolution = req.resolution.as_deref().unwrap_or(&record.resolution);
    if let Some(wanted) = &req.resolution {
        if sizes.map(|s| !s.contains_key(wanted)).unwrap_or(true) {
            return Err(Error::BadRequest(format!(
                "resolution {wanted} not advertised for format {format}"
            )));
        }
    }

    if let Some(framerate) = req.framerate {
        let advertised = sizes
            .and_then(|s| s.get(resolution))
            .map(|rates| rates.contains(&framerate))
            .unwrap_or(false);
        if !advertised {
            return Err(Error::BadRequest(format!(
                "framerate {framerate} not advertised for {format} {resolution}"
            )));
        }
    }

    Ok(())
}

fn apply_update(record: &mut CameraRecord, req: UpdateCameraRequest) {
    if let Some(friendly_name) = req.friendly_name {
        record.friendly_name = friendly_name;
    }
    if let Some(format) = req.format {
        record.format = format;
    }
    if let Some(resolution) = req.resolution {
        record.resolution = resolution;
    }
    if let Some(framerate) = req.framerate {
        record.framerate = framerate;
    }
    if let Some(bitrate) = req.bitrate {
        record.bitrate = bitrate;
    }
    if let Some(rotation) = req.rotation {
        record.rotation = rotation;
    }
    if let Some(encoder) = req.encoder {
        record.encoder = encoder;
    }
    if let Some(input_format) = req.input_format {
        record.input_format = if input_format.is_empty() {
            None
        } else {
            Some(input_format)
        };
    }
    if let Some(controls) = req.controls {
        record.controls = controls;
    }
    if let Some(overlay_path) = req.overlay_path {
        record.overlay_path = if overlay_path.is_empty() {
            None
        } else {
            Some(overlay_path)
        };
    }
    if let Some(moonraker_enabled) = req.moonraker_enabled {
        record.moonraker_enabled = moonraker_enabled;
    }
    if let Some(enabled) = req.enabled {
        record.enabled = enabled;
    }
}

// ========================================
// Manual device registration
// ========================================

#[derive(Debug, Deserialize)]
struct AddDeviceRequest {
    device_path: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    overrides: Overrides,
}

async fn add_device(
    State(state): State<AppState>,
    Json(req): Json<AddDeviceRequest>,
) -> Result<impl IntoResponse> {
    let path = std::path::Path::new(&req.device_path);

    let snapshot = state
        .inspector
        .inspect(path)
        .await?
        .ok_or_else(|| {
            Error::BadRequest(format!("{} is not a video capture device", req.device_path))
        })?;

    let uid = snapshot.fingerprint.uid();
    let selection = profile::select(
        &snapshot.capabilities,
        state.probe.effective_score(),
        &req.overrides,
        &state.probe.encoders,
    );

    let mut record = match state.store.get(&uid).await? {
        Some(mut existing) => {
            existing.device_path = Some(req.device_path.clone());
            existing.capabilities = snapshot.capabilities;
            existing
        }
        None => CameraRecord::new(
            uid.clone(),
            snapshot.fingerprint,
            snapshot.hardware_name,
            Some(req.device_path.clone()),
            snapshot.capabilities,
        ),
    };

    record.format = selection.format;
    record.resolution = selection.resolution;
    record.framerate = selection.framerate;
    record.bitrate = selection.bitrate;
    record.encoder = selection.encoder;
    record.connected = true;
    if let Some(friendly_name) = req.friendly_name {
        record.friendly_name = friendly_name;
    }
    record.updated_at = chrono::Utc::now();

    state.store.upsert(&record).await?;
    state
        .store
        .append_log("info", Some(&uid), "camera added manually")
        .await?;

    let report = state.reconciler.reconcile().await;
    Ok(Json(ApiResponse::converged(record, report.sync_errors)))
}

// ========================================
// Reconciliation & status
// ========================================

async fn force_reconcile(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.reconciler.reconcile().await;
    let sync_errors = report.sync_errors.clone();
    Json(ApiResponse::converged(report, sync_errors))
}

async fn system_status(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.store.list().await?;
    let health = *state.health.read().await;

    let status = SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        cpu_score: state.probe.score,
        effective_score: state.probe.effective_score(),
        encoders: state
            .probe
            .encoders
            .available()
            .iter()
            .map(|encoder| encoder.as_str().to_string())
            .collect(),
        stream_server_reachable: health.stream_reachable,
        orchestrator_reachable: health.registry_reachable,
        cameras_total: cameras.len(),
        cameras_connected: cameras.iter().filter(|camera| camera.connected).count(),
        ingress_mode: state.ingress_mode.as_str().to_string(),
    };

    Ok(Json(ApiResponse::success(status)))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<i64>,
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let entries = state.store.logs(limit).await?;
    Ok(Json(ApiResponse::success(entries)))
}
