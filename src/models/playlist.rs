//! Playlist data model
//!
//! Playlists are produced by the playlist engine and never mutated;
//! re-generation produces a new id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One sequenced track with the score of the transition into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub path: PathBuf,
    /// Transition score from the previous entry; 0.0 for the first track
    pub transition_score: f64,
    pub bpm: f64,
    pub camelot: crate::models::camelot::Camelot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub duration_seconds: f64,
}

/// Computed playlist-level aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistMetadata {
    pub total_duration_seconds: f64,
    pub avg_bpm: f64,
    /// Energy of the sequence resampled to 16 points
    pub energy_curve: Vec<f64>,
    pub preset_name: String,
    /// True when the beam ran dry before reaching the target duration
    #[serde(default)]
    pub truncated: bool,
    /// True when no candidate satisfied the constraints at all
    #[serde(default)]
    pub empty: bool,
}

/// An ordered sequence of track references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub tracks: Vec<PlaylistEntry>,
    pub metadata: PlaylistMetadata,
}

impl Playlist {
    /// An empty playlist for the "no feasible sequence" outcome, which is a
    /// completed task, not a failure
    pub fn empty(preset_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            tracks: Vec::new(),
            metadata: PlaylistMetadata {
                total_duration_seconds: 0.0,
                avg_bpm: 0.0,
                energy_curve: vec![0.0; 16],
                preset_name: preset_name.to_string(),
                truncated: false,
                empty: true,
            },
        }
    }
}

/// Resample a per-track value series to a fixed-length curve
///
/// Used for the 16-point playlist energy curve; nearest-sample resampling
/// keeps short playlists readable (a 3-track list yields 3 plateaus).
pub fn resample_curve(values: &[f64], points: usize) -> Vec<f64> {
    if values.is_empty() {
        return vec![0.0; points];
    }
    (0..points)
        .map(|i| {
            let idx = i * values.len() / points;
            values[idx.min(values.len() - 1)]
        })
        .collect()
}
