//! mixdeck — headless DJ library analyzer and playlist generator
//!
//! Turns a directory of audio files into a queryable, feature-annotated
//! library (tempo, key, energy, mood) and sequences playlists that respect
//! harmonic compatibility, BPM flow and a target energy arc. All
//! long-running work runs as background tasks with polled progress.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use crate::error::{AppError, AppResult, ErrorCode};

use crate::config::Settings;
use crate::services::{ExtractorHandle, PresetLibrary, TaskManager};
use crate::store::Store;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<Store>,
    pub tasks: Arc<TaskManager>,
    pub extractor: ExtractorHandle,
    pub presets: Arc<PresetLibrary>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Store,
        tasks: TaskManager,
        extractor: ExtractorHandle,
        presets: PresetLibrary,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            store: Arc::new(store),
            tasks: Arc::new(tasks),
            extractor,
            presets: Arc::new(presets),
            started_at: Utc::now(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::analysis_routes())
        .merge(api::track_routes())
        .merge(api::playlist_routes())
        .with_state(state)
}
