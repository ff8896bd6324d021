//! Liveness endpoint

use axum::{extract::State, response::Json};
use chrono::Utc;
use serde::Serialize;

use crate::api::routes::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: String,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub devices: usize,
}

/// @route GET /health
/// @output 200 with {status, service, version, uptime_seconds, devices}
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let uptime_seconds = (Utc::now() - state.started_at)
        .num_seconds()
        .max(0)
        .try_into()
        .unwrap_or(0);

    Json(HealthStatus {
        status: "healthy",
        service: state.service_name.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        devices: state.registry.len(),
    })
}
