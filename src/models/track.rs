//! Track and feature data model
//!
//! A [`Track`] is the unit of the library: a file on disk plus the features
//! the analyzer extracted for it. Features are immutable once written to the
//! cache; re-analysis produces a new cache entry.

use crate::models::camelot::Camelot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Current analyzer version. Cache entries written by older versions are
/// treated as misses and re-analysed.
pub const ANALYSIS_VERSION: u32 = 3;

/// Valid BPM window; extractions outside it fail the file
pub const BPM_MIN: f64 = 40.0;
pub const BPM_MAX: f64 = 240.0;

/// Minimum number of energy time-series samples per track
pub const MIN_ENERGY_SAMPLES: usize = 8;

/// The closed mood vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Energetic,
    Happy,
    Calm,
    Melancholic,
    Aggressive,
    Euphoric,
    Dark,
    Driving,
    Neutral,
}

impl Mood {
    pub const ALL: [Mood; 9] = [
        Mood::Energetic,
        Mood::Happy,
        Mood::Calm,
        Mood::Melancholic,
        Mood::Aggressive,
        Mood::Euphoric,
        Mood::Dark,
        Mood::Driving,
        Mood::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Energetic => "energetic",
            Mood::Happy => "happy",
            Mood::Calm => "calm",
            Mood::Melancholic => "melancholic",
            Mood::Aggressive => "aggressive",
            Mood::Euphoric => "euphoric",
            Mood::Dark => "dark",
            Mood::Driving => "driving",
            Mood::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Mood> {
        Mood::ALL.iter().copied().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tag mood scores; the closed key set makes this a struct, not a map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MoodScores {
    pub energetic: f64,
    pub happy: f64,
    pub calm: f64,
    pub melancholic: f64,
    pub aggressive: f64,
    pub euphoric: f64,
    pub dark: f64,
    pub driving: f64,
    pub neutral: f64,
}

impl MoodScores {
    pub fn get(&self, mood: Mood) -> f64 {
        match mood {
            Mood::Energetic => self.energetic,
            Mood::Happy => self.happy,
            Mood::Calm => self.calm,
            Mood::Melancholic => self.melancholic,
            Mood::Aggressive => self.aggressive,
            Mood::Euphoric => self.euphoric,
            Mood::Dark => self.dark,
            Mood::Driving => self.driving,
            Mood::Neutral => self.neutral,
        }
    }

    pub fn set(&mut self, mood: Mood, value: f64) {
        match mood {
            Mood::Energetic => self.energetic = value,
            Mood::Happy => self.happy = value,
            Mood::Calm => self.calm = value,
            Mood::Melancholic => self.melancholic = value,
            Mood::Aggressive => self.aggressive = value,
            Mood::Euphoric => self.euphoric = value,
            Mood::Dark => self.dark = value,
            Mood::Driving => self.driving = value,
            Mood::Neutral => self.neutral = value,
        }
    }

    pub fn total(&self) -> f64 {
        Mood::ALL.iter().map(|m| self.get(*m)).sum()
    }

    /// Scale so the scores sum to 1.0; an all-zero vector becomes pure neutral
    pub fn normalize(&mut self) {
        let total = self.total();
        if total <= f64::EPSILON {
            *self = MoodScores::default();
            self.neutral = 1.0;
            return;
        }
        for mood in Mood::ALL {
            self.set(mood, self.get(mood) / total);
        }
    }

    /// The highest-scoring tag, neutral on an empty vector
    pub fn dominant(&self) -> Mood {
        Mood::ALL
            .iter()
            .copied()
            .max_by(|a, b| self.get(*a).total_cmp(&self.get(*b)))
            .unwrap_or(Mood::Neutral)
    }
}

/// Per-field extraction confidence in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub bpm: f64,
    pub key: f64,
    pub energy: f64,
    pub mood: f64,
}

impl Default for Confidence {
    fn default() -> Self {
        Self {
            bpm: 1.0,
            key: 1.0,
            energy: 1.0,
            mood: 1.0,
        }
    }
}

/// One sample of the energy envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyPoint {
    /// Seconds from track start
    pub t: f64,
    /// Energy in [0, 1]
    pub v: f64,
}

/// Extracted audio features, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    /// Tempo in beats per minute, within [40, 240]
    pub bpm: f64,
    /// Musical key name, e.g. "Am"; always agrees with `camelot`
    pub key: String,
    /// Camelot wheel position, e.g. "8A"; always agrees with `key`
    pub camelot: Camelot,
    /// Aggregate spectral + RMS energy in [0, 1]
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    /// Energy envelope over [0, duration], at least 8 samples
    pub energy_timeseries: Vec<EnergyPoint>,
    /// Sampling stride of the envelope in seconds
    pub stride_seconds: f64,
    pub confidence: Confidence,
    /// Dominant mood tag
    pub mood: Mood,
    /// Per-tag scores summing to 1.0
    pub mood_scores: MoodScores,
}

impl Features {
    /// Check the invariants the store relies on. A violation here means the
    /// extractor (or a cache file edited by hand) broke its contract.
    pub fn validate(&self, duration_seconds: f64) -> Result<(), String> {
        if !(BPM_MIN..=BPM_MAX).contains(&self.bpm) {
            return Err(format!("bpm {} outside [{}, {}]", self.bpm, BPM_MIN, BPM_MAX));
        }
        match Camelot::from_key(&self.key) {
            Some(from_key) if from_key == self.camelot => {}
            Some(from_key) => {
                return Err(format!(
                    "key {} maps to {} but camelot is {}",
                    self.key, from_key, self.camelot
                ));
            }
            None => return Err(format!("unknown key name: {}", self.key)),
        }
        for (name, value) in [
            ("energy", self.energy),
            ("valence", self.valence),
            ("danceability", self.danceability),
            ("acousticness", self.acousticness),
            ("instrumentalness", self.instrumentalness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} {} outside [0, 1]", name, value));
            }
        }
        if self.energy_timeseries.len() < MIN_ENERGY_SAMPLES {
            return Err(format!(
                "energy time series has {} samples, need at least {}",
                self.energy_timeseries.len(),
                MIN_ENERGY_SAMPLES
            ));
        }
        let mut last_t = f64::NEG_INFINITY;
        for point in &self.energy_timeseries {
            if point.t < last_t {
                return Err("energy time series timestamps decrease".to_string());
            }
            last_t = point.t;
        }
        if let Some(last) = self.energy_timeseries.last() {
            if duration_seconds > 0.0 && last.t + self.stride_seconds < duration_seconds {
                return Err(format!(
                    "energy time series ends at {:.1}s but track is {:.1}s",
                    last.t, duration_seconds
                ));
            }
        }
        Ok(())
    }
}

/// Embedded file tags; missing tags stay absent, never empty strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackTags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
}

/// File-level facts captured when the entry was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_size: u64,
    /// Modification time as seconds since the epoch, as reported by stat
    pub mtime: i64,
    /// Lowercased extension, e.g. "flac"
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    pub duration_seconds: f64,
}

/// The unit of the library: a file plus its analysis state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Canonicalised absolute path; primary identity for external references
    pub path: PathBuf,
    /// Hex digest of the file contents; the cache's primary key
    pub content_id: String,
    #[serde(flatten)]
    pub file: FileInfo,
    #[serde(default)]
    pub tags: TrackTags,
    /// Absent until analysed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysed_at: Option<DateTime<Utc>>,
}

impl Track {
    /// Filename portion of the path for search and display
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Aggregates over the whole store, served by `/api/analysis/cache/stats`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_tracks: u64,
    pub analysed_tracks: u64,
    pub cache_size_bytes: u64,
    /// Track counts bucketed at integer BPM
    pub bpm_histogram: BTreeMap<u32, u64>,
    /// Track counts per dominant mood
    pub mood_histogram: BTreeMap<String, u64>,
    /// Hits / (hits + misses) since startup; 0.0 when no lookups happened
    pub cache_hit_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}
