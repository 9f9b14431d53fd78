//! Admin API
//!
//! JSON surface consumed by the external administration front-end. Every
//! mutating operation forces a reconcile tick and answers only after that
//! tick converged, carrying its sync errors in the response.

pub mod routes;

pub use routes::create_router;

use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::json;

/// Liveness probe
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = *state.health.read().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stream_server": health.stream_reachable,
        "orchestrator": health.registry_reachable,
    }))
}
