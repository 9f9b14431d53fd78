//! Shared models and types
//!
//! Types used by both the reconciler and the admin API, kept here to avoid
//! circular module dependencies.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_errors: Vec<SyncError>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            sync_errors: Vec::new(),
        }
    }

    /// Success payload carrying the sync errors of the reconcile tick the
    /// operation waited on.
    pub fn converged(data: T, sync_errors: Vec<SyncError>) -> Self {
        Self {
            ok: sync_errors.is_empty(),
            data: Some(data),
            error: None,
            sync_errors,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
            sync_errors: Vec::new(),
        }
    }
}

/// Which external authority an operation targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Stream,
    Registry,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Stream => "stream",
            Backend::Registry => "registry",
        }
    }
}

/// Structured record of a failed convergence operation within a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_uid: Option<String>,
    pub backend: Backend,
    pub kind: String,
    pub message: String,
}

/// Outcome of one reconcile tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickReport {
    /// Stream path creates/replaces/deletes issued this tick
    pub stream_ops: usize,
    /// Webcam registration operations issued this tick
    pub registry_ops: usize,
    pub sync_errors: Vec<SyncError>,
}

/// System status reported by the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub cpu_score: u8,
    pub effective_score: u8,
    pub encoders: Vec<String>,
    pub stream_server_reachable: bool,
    pub orchestrator_reachable: bool,
    pub cameras_total: usize,
    pub cameras_connected: usize,
    pub ingress_mode: String,
}
