//! Track query API

use crate::error::{AppError, AppResult};
use crate::models::{Camelot, Mood, Track};
use crate::store::filter::{SortBy, SortOrder, TrackFilter, DEFAULT_PER_PAGE};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Listing row: the full Track minus the energy time series, which only
/// the single-track endpoint carries
#[derive(Debug, Serialize)]
pub struct TrackSummary {
    pub path: PathBuf,
    pub filename: String,
    pub content_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    pub duration_seconds: f64,
    pub format: String,
    pub bpm: f64,
    pub key: String,
    pub camelot: Camelot,
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub mood: Mood,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysed_at: Option<DateTime<Utc>>,
}

impl TrackSummary {
    fn from_track(track: &Track) -> Option<Self> {
        let features = track.features.as_ref()?;
        Some(Self {
            path: track.path.clone(),
            filename: track.filename(),
            content_id: track.content_id.clone(),
            title: track.tags.title.clone(),
            artist: track.tags.artist.clone(),
            album: track.tags.album.clone(),
            duration_seconds: track.file.duration_seconds,
            format: track.file.format.clone(),
            bpm: features.bpm,
            key: features.key.clone(),
            camelot: features.camelot,
            energy: features.energy,
            valence: features.valence,
            danceability: features.danceability,
            mood: features.mood,
            analysed_at: track.analysed_at,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListTracksQuery {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub search: Option<String>,
    pub key: Option<String>,
    pub camelot: Option<String>,
    pub mood: Option<String>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Serialize)]
pub struct ListTracksResponse {
    pub tracks: Vec<TrackSummary>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// GET /api/tracks
pub async fn list_tracks(
    State(state): State<AppState>,
    Query(query): Query<ListTracksQuery>,
) -> AppResult<Json<ListTracksResponse>> {
    let mut filter = TrackFilter {
        search: query.search.clone(),
        min_bpm: query.min_bpm,
        max_bpm: query.max_bpm,
        min_energy: query.min_energy,
        max_energy: query.max_energy,
        ..Default::default()
    };
    if let Some(key) = &query.key {
        filter.keys = vec![key.clone()];
    }
    if let Some(camelot) = &query.camelot {
        let parsed: Camelot = camelot
            .parse()
            .map_err(|e| AppError::invalid_argument(format!("{e}")))?;
        filter.camelots = vec![parsed];
    }
    if let Some(mood) = &query.mood {
        let parsed = Mood::parse(mood)
            .ok_or_else(|| AppError::invalid_argument(format!("unknown mood: {mood}")))?;
        filter.moods = vec![parsed];
    }

    let (tracks, total, page) = state.store.list(
        &filter,
        query.sort_by.unwrap_or_default(),
        query.sort_order.unwrap_or_default(),
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(DEFAULT_PER_PAGE),
    );

    Ok(Json(ListTracksResponse {
        tracks: tracks.iter().filter_map(TrackSummary::from_track).collect(),
        total,
        page: page.page,
        per_page: page.per_page,
        total_pages: page.total_pages,
    }))
}

/// GET /api/tracks/{path} — `path` is the URL-encoded absolute path;
/// returns the full Track including the energy time series
pub async fn get_track(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Json<Track>> {
    let track = state.store.get_by_path(std::path::Path::new(&path))?;
    Ok(Json(track))
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub track_path: String,
    pub limit: Option<usize>,
    pub similarity_threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SimilarEntry {
    #[serde(flatten)]
    pub track: TrackSummary,
    pub similarity: f64,
}

#[derive(Debug, Serialize)]
pub struct SimilarResponse {
    pub reference: PathBuf,
    pub results: Vec<SimilarEntry>,
}

/// GET /api/tracks/search/similar
pub async fn similar_tracks(
    State(state): State<AppState>,
    Query(query): Query<SimilarQuery>,
) -> AppResult<Json<SimilarResponse>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let threshold = query.similarity_threshold.unwrap_or(0.0);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(AppError::invalid_argument(
            "similarity_threshold must be in [0, 1]",
        ));
    }

    let reference = PathBuf::from(&query.track_path);
    let results = state.store.similar(&reference, limit, threshold)?;
    Ok(Json(SimilarResponse {
        reference,
        results: results
            .iter()
            .filter_map(|(track, score)| {
                TrackSummary::from_track(track).map(|summary| SimilarEntry {
                    track: summary,
                    similarity: *score,
                })
            })
            .collect(),
    }))
}

pub fn track_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tracks", get(list_tracks))
        .route("/api/tracks/search/similar", get(similar_tracks))
        .route("/api/tracks/:path", get(get_track))
}
