//! Playlist generation, preset and export API

use crate::error::{AppError, AppResult, ErrorCode};
use crate::models::preset::CurveSpec;
use crate::models::task::Task;
use crate::models::{Playlist, Preset, ScoreWeights, TaskKind};
use crate::services::exporter::{self, ExportFormat};
use crate::services::playlist_engine::{rng_seed_from_task, GenerationSpec};
use crate::services::task_manager::{ResultStatus, TaskManager};
use crate::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Per-request overrides layered over the chosen preset
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CustomRules {
    pub bpm_range: Option<(f64, f64)>,
    pub energy_range: Option<(f64, f64)>,
    pub target_energy_curve: Option<CurveSpec>,
    pub harmony_strictness: Option<f64>,
    pub mood_consistency: Option<f64>,
    pub max_bpm_jump: Option<f64>,
    pub avoid_same_artist_window: Option<usize>,
    pub min_track_duration: Option<f64>,
    pub max_track_duration: Option<f64>,
    pub beam_width: Option<usize>,
    pub weights: Option<ScoreWeights>,
    /// 0.0 deterministic, 1.0 pure noise
    pub surprise: Option<f64>,
}

impl CustomRules {
    fn apply(&self, preset: &mut Preset) {
        if let Some(v) = self.bpm_range {
            preset.bpm_range = v;
        }
        if let Some(v) = self.energy_range {
            preset.energy_range = v;
        }
        if let Some(v) = &self.target_energy_curve {
            preset.target_energy_curve = v.clone();
        }
        if let Some(v) = self.harmony_strictness {
            preset.harmony_strictness = v;
        }
        if let Some(v) = self.mood_consistency {
            preset.mood_consistency = v;
        }
        if let Some(v) = self.max_bpm_jump {
            preset.max_bpm_jump = v;
        }
        if let Some(v) = self.avoid_same_artist_window {
            preset.avoid_same_artist_window = v;
        }
        if let Some(v) = self.min_track_duration {
            preset.min_track_duration = Some(v);
        }
        if let Some(v) = self.max_track_duration {
            preset.max_track_duration = Some(v);
        }
        if let Some(v) = self.beam_width {
            preset.beam_width = v;
        }
        if let Some(v) = self.weights {
            preset.weights = v;
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct GenerateRequest {
    /// Restrict the candidate pool to these paths
    pub track_file_paths: Option<Vec<PathBuf>>,
    pub preset_name: Option<String>,
    pub custom_rules: Option<CustomRules>,
    pub target_duration_minutes: Option<f64>,
    /// Constrains the first track
    pub seed: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub task_id: Uuid,
    pub status_url: String,
}

/// POST /api/playlists/generate
pub async fn generate_playlist(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> AppResult<Json<GenerateResponse>> {
    let mut preset = match &request.preset_name {
        Some(name) => state
            .presets
            .get(name)
            .ok_or_else(|| AppError::not_found(format!("preset not found: {name}")))?,
        None => state
            .presets
            .list()
            .into_iter()
            .next()
            .expect("builtin presets are never empty"),
    };

    let surprise = request
        .custom_rules
        .as_ref()
        .and_then(|rules| rules.surprise)
        .unwrap_or(0.0);
    if !(0.0..=1.0).contains(&surprise) {
        return Err(AppError::invalid_argument("surprise must be in [0, 1]"));
    }
    if let Some(rules) = &request.custom_rules {
        rules.apply(&mut preset);
    }
    preset.validate().map_err(AppError::invalid_argument)?;

    let target_minutes = request.target_duration_minutes.unwrap_or(60.0);
    if target_minutes <= 0.0 {
        return Err(AppError::invalid_argument(
            "target_duration_minutes must be positive",
        ));
    }

    let handle = state.tasks.submit(TaskKind::PlaylistGeneration)?;
    let spec = GenerationSpec {
        preset,
        target_duration_seconds: target_minutes * 60.0,
        seed_path: request.seed,
        pool_paths: request.track_file_paths,
        surprise,
        rng_seed: rng_seed_from_task(handle.id()),
    };

    let response = GenerateResponse {
        task_id: handle.id(),
        status_url: format!("/api/playlists/generate/{}/status", handle.id()),
    };

    let engine = crate::services::PlaylistEngine::new(
        std::sync::Arc::clone(&state.store),
        std::time::Duration::from_secs(state.settings.generation_timeout_secs),
    );
    TaskManager::spawn_supervised(handle.clone(), async move {
        engine.generate(spec, handle).await
    });

    Ok(Json(response))
}

/// GET /api/playlists/generate/{id}/status
pub async fn generation_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    Ok(Json(state.tasks.status(id)?))
}

/// GET /api/playlists/generate/{id}/result — the playlist when ready,
/// 202 while the task is still running
pub async fn generation_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    match state.tasks.result(id)? {
        ResultStatus::Ready(crate::models::TaskResult::Playlist(playlist)) => {
            Ok(Json(playlist).into_response())
        }
        ResultStatus::Ready(_) => Err(AppError::conflict(format!(
            "task {id} is not a playlist generation task"
        ))),
        ResultStatus::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "pending", "task_id": id })),
        )
            .into_response()),
        ResultStatus::Failed { errors } => {
            let code = errors.first().map(|e| e.code).unwrap_or(ErrorCode::Internal);
            let message = errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "generation failed".to_string());
            Err(AppError::Coded(code, message))
        }
        ResultStatus::Cancelled => Err(AppError::conflict(format!("task {id} was cancelled"))),
    }
}

/// POST /api/playlists/generate/{id}/cancel — idempotent
pub async fn cancel_generation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Task>> {
    state.tasks.cancel(id)?;
    Ok(Json(state.tasks.status(id)?))
}

#[derive(Debug, Serialize)]
pub struct PresetSummary {
    pub name: String,
    pub description: String,
    pub is_builtin: bool,
}

#[derive(Debug, Serialize)]
pub struct PresetsResponse {
    pub presets: Vec<PresetSummary>,
}

/// GET /api/playlists/presets
pub async fn list_presets(State(state): State<AppState>) -> Json<PresetsResponse> {
    let builtin_names: Vec<String> = crate::models::builtin_presets()
        .into_iter()
        .map(|p| p.name)
        .collect();
    Json(PresetsResponse {
        presets: state
            .presets
            .list()
            .into_iter()
            .map(|p| PresetSummary {
                is_builtin: builtin_names.contains(&p.name),
                name: p.name,
                description: p.description,
            })
            .collect(),
    })
}

/// GET /api/playlists/presets/{name}
pub async fn preset_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<Preset>> {
    state
        .presets
        .get(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("preset not found: {name}")))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub playlist_data: Playlist,
    pub format_type: String,
    pub filename: String,
    #[serde(default = "default_include_metadata")]
    pub include_metadata: bool,
}

fn default_include_metadata() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub filename: String,
    pub path: PathBuf,
    pub bytes: usize,
    pub format: ExportFormat,
}

/// POST /api/playlists/export
pub async fn export_playlist(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> AppResult<Json<ExportResponse>> {
    let format = ExportFormat::parse(&request.format_type).ok_or_else(|| {
        AppError::invalid_argument(format!(
            "format_type must be one of m3u, json, csv, rekordbox; got {}",
            request.format_type
        ))
    })?;

    let payload = exporter::render(&request.playlist_data, format, request.include_metadata)?;
    let written = exporter::write_export(
        &state.settings.exports_dir(),
        &request.filename,
        format,
        &payload,
    )?;

    Ok(Json(ExportResponse {
        filename: written
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: written,
        bytes: payload.len(),
        format,
    }))
}

pub fn playlist_routes() -> Router<AppState> {
    Router::new()
        .route("/api/playlists/generate", post(generate_playlist))
        .route("/api/playlists/generate/:id/status", get(generation_status))
        .route("/api/playlists/generate/:id/result", get(generation_result))
        .route("/api/playlists/generate/:id/cancel", post(cancel_generation))
        .route("/api/playlists/presets", get(list_presets))
        .route("/api/playlists/presets/:name", get(preset_detail))
        .route("/api/playlists/export", post(export_playlist))
}
