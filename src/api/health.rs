//! Health check endpoint

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub cache: String,
    pub analyzer: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_library_path: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds()
        .max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        components: ComponentStatus {
            cache: format!("ok ({} entries)", state.store.entry_count()),
            analyzer: "ok".to_string(),
        },
        music_library_path: state
            .settings
            .music_library_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string()),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
