// backend/src/routes/health.rs

use std::sync::Arc;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::state::AppState;

static STARTED_AT: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: i64,
}

pub async fn health_check() -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        uptime_secs: (now - *STARTED_AT).num_seconds(),
    })
}

/// Pins the uptime origin to process start rather than the first health probe.
pub fn mark_started() {
    Lazy::force(&STARTED_AT);
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
}
