//! Analysis API: task lifecycle and cache administration

use crate::error::{AppError, AppResult};
use crate::models::task::Task;
use crate::services::analysis_pipeline::run_analysis;
use crate::services::file_scanner::{ScanError, ScanRequest, SUPPORTED_EXTENSIONS};
use crate::services::task_manager::TaskManager;
use crate::models::TaskKind;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// POST /api/analysis/start request body
#[derive(Debug, Deserialize, Default)]
pub struct StartAnalysisRequest {
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    #[serde(default)]
    pub file_paths: Vec<PathBuf>,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    #[serde(default)]
    pub overwrite_cache: bool,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

fn default_recursive() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct StartAnalysisResponse {
    pub task_id: Uuid,
    pub total_files: usize,
    pub status_url: String,
}

/// POST /api/analysis/start
///
/// Scans up front so the caller learns the file count, then runs the
/// worker pool on a background task. 202-style fire-and-forget with
/// status polling.
pub async fn start_analysis(
    State(state): State<AppState>,
    Json(request): Json<StartAnalysisRequest>,
) -> AppResult<Json<StartAnalysisResponse>> {
    if request.directories.is_empty() && request.file_paths.is_empty() {
        return Err(AppError::invalid_argument(
            "at least one of directories or file_paths is required",
        ));
    }

    let scan_request = ScanRequest {
        directories: request.directories.clone(),
        file_paths: request.file_paths.clone(),
        recursive: request.recursive,
        include_patterns: request.include_patterns.clone(),
        exclude_patterns: request.exclude_patterns.clone(),
    };

    let scanner = crate::services::FileScanner::new(
        state.settings.min_file_kb,
        state.settings.max_file_size_mb,
    );
    let outcome = tokio::task::spawn_blocking(move || scanner.scan(&scan_request))
        .await
        .map_err(|e| AppError::internal(format!("scan task failed: {e}")))?
        .map_err(map_scan_error)?;

    // files that vanished since the last scan drop out of the path index;
    // roots are canonicalised to match the index's path keys
    let seen = outcome.files.iter().cloned().collect();
    let roots: Vec<PathBuf> = request
        .directories
        .iter()
        .filter_map(|dir| dir.canonicalize().ok())
        .collect();
    state.store.retire_missing(&roots, &seen);

    let handle = state.tasks.submit(TaskKind::Analysis)?;
    handle.set_totals(outcome.files.len());
    for warning in &outcome.warnings {
        handle.push_error(crate::models::TaskError {
            path: Some(warning.path.to_string_lossy().to_string()),
            code: crate::error::ErrorCode::IoError,
            message: warning.message.clone(),
        });
    }

    let response = StartAnalysisResponse {
        task_id: handle.id(),
        total_files: outcome.files.len(),
        status_url: format!("/api/analysis/{}/status", handle.id()),
    };

    let store = Arc::clone(&state.store);
    let extractor = state.extractor.clone();
    let max_workers = state.settings.max_workers;
    let overwrite = request.overwrite_cache;
    let files = outcome.files;
    TaskManager::spawn_supervised(
        handle.clone(),
        run_analysis(store, extractor, max_workers, overwrite, files, handle.clone()),
    );

    Ok(Json(response))
}

fn map_scan_error(err: ScanError) -> AppError {
    match err {
        ScanError::RootNotFound(path) => {
            AppError::not_found(format!("scan root not found: {}", path.display()))
        }
        ScanError::TooDeep(_) => AppError::invalid_argument(err.to_string()),
        ScanError::Io { source, .. } => AppError::Io(source),
    }
}

/// GET /api/analysis/{id}/status
pub async fn analysis_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    Ok(Json(state.tasks.status(id)?))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: Uuid,
    pub state: crate::models::TaskState,
    pub processed_files: usize,
}

/// POST /api/analysis/{id}/cancel — idempotent
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CancelResponse>> {
    state.tasks.cancel(id)?;
    let task = state.tasks.status(id)?;
    Ok(Json(CancelResponse {
        task_id: id,
        state: task.state,
        processed_files: task.processed_files,
    }))
}

/// GET /api/analysis/cache/stats
pub async fn cache_stats(
    State(state): State<AppState>,
) -> Json<crate::models::track::StoreStats> {
    Json(state.store.stats())
}

#[derive(Debug, Deserialize, Default)]
pub struct CleanupRequest {
    pub older_than_days: Option<u32>,
    pub max_size_gb: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed_entries: usize,
    pub freed_bytes: u64,
    pub freed_mb: f64,
}

/// POST /api/analysis/cache/cleanup
pub async fn cache_cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> AppResult<Json<CleanupResponse>> {
    if let Some(gb) = request.max_size_gb {
        if gb < 0.0 {
            return Err(AppError::invalid_argument("max_size_gb must be non-negative"));
        }
    }
    let max_bytes = request
        .max_size_gb
        .map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64);
    let report = state.store.cleanup(request.older_than_days, max_bytes);
    Ok(Json(CleanupResponse {
        removed_entries: report.removed_entries,
        freed_bytes: report.freed_bytes,
        freed_mb: report.freed_bytes as f64 / (1024.0 * 1024.0),
    }))
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed_entries: usize,
}

/// POST /api/analysis/cache/clear
pub async fn cache_clear(State(state): State<AppState>) -> AppResult<Json<ClearResponse>> {
    let removed = state.store.clear()?;
    Ok(Json(ClearResponse {
        removed_entries: removed,
    }))
}

#[derive(Debug, Serialize)]
pub struct FormatInfo {
    pub extension: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Serialize)]
pub struct FormatsResponse {
    pub formats: Vec<FormatInfo>,
}

/// GET /api/analysis/formats
pub async fn supported_formats() -> Json<FormatsResponse> {
    let name_of = |ext: &str| match ext {
        "mp3" => "MPEG audio layer III",
        "flac" => "Free Lossless Audio Codec",
        "ogg" | "oga" => "Ogg Vorbis",
        "m4a" | "aac" | "mp4" => "MPEG-4 audio",
        "wav" => "Waveform audio",
        "opus" => "Opus",
        "wma" => "Windows Media Audio",
        "aiff" => "Audio Interchange File Format",
        _ => "Audio",
    };
    Json(FormatsResponse {
        formats: SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| FormatInfo {
                extension: ext,
                name: name_of(ext),
            })
            .collect(),
    })
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analysis/start", post(start_analysis))
        .route("/api/analysis/:id/status", get(analysis_status))
        .route("/api/analysis/:id/cancel", post(cancel_analysis))
        .route("/api/analysis/cache/stats", get(cache_stats))
        .route("/api/analysis/cache/cleanup", post(cache_cleanup))
        .route("/api/analysis/cache/clear", post(cache_clear))
        .route("/api/analysis/formats", get(supported_formats))
}
