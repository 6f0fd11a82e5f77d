//! External analyzer client
//!
//! The DSP lives in a separate command-line analyzer (configured via
//! `ANALYZER_CMD`, default `mixdeck-analyzer`). The client invokes it per
//! file and parses the JSON it prints on stdout into an [`Extraction`].
//! This is the production implementation of the [`FeatureExtractor`]
//! boundary; tests substitute their own.

use crate::models::track::{EnergyPoint, TrackTags};
use crate::services::feature_extractor::{
    ExtractError, ExtractOptions, Extraction, FeatureExtractor, RawFeatures,
};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

/// JSON shape the analyzer prints, one object per file
#[derive(Debug, Deserialize)]
struct AnalyzerOutput {
    duration_seconds: f64,
    sample_rate: Option<u32>,
    bitrate: Option<u32>,
    #[serde(default)]
    tags: AnalyzerTags,
    features: AnalyzerFeatures,
}

#[derive(Debug, Deserialize, Default)]
struct AnalyzerTags {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    year: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AnalyzerFeatures {
    bpm: f64,
    key: String,
    energy: f64,
    valence: f64,
    danceability: f64,
    acousticness: f64,
    instrumentalness: f64,
    energy_timeseries: Vec<AnalyzerEnergyPoint>,
    stride_seconds: Option<f64>,
    #[serde(default)]
    confidence: AnalyzerConfidence,
}

#[derive(Debug, Deserialize)]
struct AnalyzerEnergyPoint {
    t: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct AnalyzerConfidence {
    bpm: f64,
    key: f64,
    energy: f64,
}

impl Default for AnalyzerConfidence {
    fn default() -> Self {
        Self {
            bpm: 1.0,
            key: 1.0,
            energy: 1.0,
        }
    }
}

/// Subprocess-backed extractor
pub struct AnalyzerClient {
    command: String,
}

impl AnalyzerClient {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// Probe whether the analyzer command can be spawned at all; used at
    /// startup so a misconfigured host fails loudly instead of per file
    pub fn probe(&self) -> Result<(), ExtractError> {
        match Command::new(&self.command).arg("--version").output() {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(
                ExtractError::Internal(format!("analyzer binary not found: {}", self.command)),
            ),
            Err(err) => Err(ExtractError::Io(err)),
        }
    }
}

impl FeatureExtractor for AnalyzerClient {
    fn extract(&self, path: &Path, _options: &ExtractOptions) -> Result<Extraction, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("audio file not found: {}", path.display()),
            )));
        }

        let output = Command::new(&self.command)
            .arg("--json")
            .arg(path)
            .output()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    ExtractError::Internal(format!(
                        "analyzer binary not found: {}",
                        self.command
                    ))
                } else {
                    ExtractError::Io(err)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let parsed: AnalyzerOutput = serde_json::from_slice(&output.stdout).map_err(|err| {
            ExtractError::Internal(format!("analyzer output unparseable: {err}"))
        })?;

        let stride = parsed.features.stride_seconds.unwrap_or_else(|| {
            infer_stride(&parsed.features.energy_timeseries)
        });

        Ok(Extraction {
            duration_seconds: parsed.duration_seconds,
            sample_rate: parsed.sample_rate,
            bitrate: parsed.bitrate,
            tags: TrackTags {
                title: none_if_empty(parsed.tags.title),
                artist: none_if_empty(parsed.tags.artist),
                album: none_if_empty(parsed.tags.album),
                year: parsed.tags.year,
            },
            features: RawFeatures {
                bpm: parsed.features.bpm,
                key: parsed.features.key,
                energy: parsed.features.energy,
                valence: parsed.features.valence,
                danceability: parsed.features.danceability,
                acousticness: parsed.features.acousticness,
                instrumentalness: parsed.features.instrumentalness,
                energy_timeseries: parsed
                    .features
                    .energy_timeseries
                    .into_iter()
                    .map(|p| EnergyPoint { t: p.t, v: p.v })
                    .collect(),
                stride_seconds: stride,
                confidence_bpm: parsed.features.confidence.bpm,
                confidence_key: parsed.features.confidence.key,
                confidence_energy: parsed.features.confidence.energy,
            },
        })
    }
}

/// Map the analyzer's stderr onto the failure classes
fn classify_failure(stderr: &str) -> ExtractError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("unsupported") {
        ExtractError::UnsupportedFormat(stderr.trim().to_string())
    } else if lowered.contains("corrupt") || lowered.contains("decode") {
        ExtractError::CorruptFile(stderr.trim().to_string())
    } else {
        ExtractError::Internal(stderr.trim().to_string())
    }
}

/// Tags may arrive as empty strings; the data model wants them absent
fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn infer_stride(points: &[AnalyzerEnergyPoint]) -> f64 {
    match points {
        [first, second, ..] => (second.t - first.t).max(0.0),
        _ => 1.0,
    }
}
