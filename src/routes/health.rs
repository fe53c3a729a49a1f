//! Health check route

use std::sync::OnceLock;
use std::time::Instant;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

static BOOT_TIME: OnceLock<Instant> = OnceLock::new();

pub fn mark_boot_time() {
    BOOT_TIME.get_or_init(Instant::now);
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime: u64,
}

async fn health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    let uptime = BOOT_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);
    Json(HealthResponse {
        status: "ok",
        uptime,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
