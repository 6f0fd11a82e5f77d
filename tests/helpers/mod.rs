//! Shared test fixtures: a deterministic fake extractor, a temp library
//! builder, and app-state wiring for router-level tests.

#![allow(dead_code)]

use mixdeck::config::Settings;
use mixdeck::models::track::{EnergyPoint, TrackTags};
use mixdeck::services::feature_extractor::{
    ExtractError, ExtractOptions, Extraction, ExtractorHandle, FeatureExtractor, RawFeatures,
};
use mixdeck::services::{PresetLibrary, TaskManager};
use mixdeck::store::Store;
use mixdeck::AppState;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pinned synthetic features for one file stem
#[derive(Debug, Clone)]
pub struct Pin {
    pub bpm: f64,
    pub key: &'static str,
    pub energy: f64,
    pub duration: f64,
    pub artist: Option<&'static str>,
}

impl Pin {
    pub fn new(bpm: f64, key: &'static str, energy: f64, duration: f64) -> Self {
        Self {
            bpm,
            key,
            energy,
            duration,
            artist: None,
        }
    }

    pub fn with_artist(mut self, artist: &'static str) -> Self {
        self.artist = Some(artist);
        self
    }
}

/// Deterministic extractor: features come from the pin table, never from
/// the audio bytes. Counts calls and can sleep per call to make
/// cancellation windows observable.
#[derive(Default)]
pub struct FakeExtractor {
    pins: Mutex<HashMap<String, Pin>>,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn pin(&self, stem: &str, pin: Pin) {
        self.pins.lock().unwrap().insert(stem.to_string(), pin);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FeatureExtractor for FakeExtractor {
    fn extract(&self, path: &Path, _options: &ExtractOptions) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        if stem.starts_with("corrupt") {
            return Err(ExtractError::CorruptFile(format!("bad header in {stem}")));
        }

        let pin = self
            .pins
            .lock()
            .unwrap()
            .get(&stem)
            .cloned()
            .unwrap_or_else(|| Pin::new(120.0, "Am", 0.5, 30.0));

        let samples = (pin.duration.ceil() as usize).max(8);
        let energy_timeseries: Vec<EnergyPoint> = (0..samples)
            .map(|i| EnergyPoint {
                t: i as f64 * pin.duration / (samples - 1) as f64,
                v: pin.energy,
            })
            .collect();

        Ok(Extraction {
            duration_seconds: pin.duration,
            sample_rate: Some(44_100),
            bitrate: None,
            tags: TrackTags {
                title: Some(stem.clone()),
                artist: pin.artist.map(str::to_string),
                album: None,
                year: None,
            },
            features: RawFeatures {
                bpm: pin.bpm,
                key: pin.key.to_string(),
                energy: pin.energy,
                valence: 0.5,
                danceability: 0.7,
                acousticness: 0.1,
                instrumentalness: 0.9,
                energy_timeseries,
                stride_seconds: pin.duration / (samples - 1) as f64,
                confidence_bpm: 0.95,
                confidence_key: 0.9,
                confidence_energy: 0.9,
            },
        })
    }
}

/// Write a small fake audio file; content length scales with `seconds` so
/// different pins produce different content ids
pub fn seed_file(dir: &Path, name: &str, seconds: usize) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let payload: Vec<u8> = format!("{name}:")
        .into_bytes()
        .into_iter()
        .chain(std::iter::repeat(0x5a).take(seconds * 1000))
        .collect();
    std::fs::write(&path, payload).unwrap();
    path
}

/// Wire a full AppState over a temp data root and the given extractor
pub fn test_state(data_root: &Path, extractor: Arc<dyn FeatureExtractor>, workers: usize) -> AppState {
    let settings = Settings {
        data_root: data_root.to_path_buf(),
        max_workers: workers,
        min_file_kb: 0,
        analysis_timeout_secs: 10,
        generation_timeout_secs: 30,
        ..Settings::default()
    };
    let store = Store::init(&settings.cache_dir(), settings.cache_ttl_days).unwrap();
    let presets = PresetLibrary::new(&settings.presets_dir()).unwrap();
    let handle = ExtractorHandle::new(
        extractor,
        ExtractOptions {
            analysis_timeout: Duration::from_secs(settings.analysis_timeout_secs),
        },
    );
    let tasks = TaskManager::new(8);
    AppState::new(settings, store, tasks, handle, presets)
}

/// Poll a task until it reaches a terminal state
pub async fn wait_terminal(state: &AppState, id: uuid::Uuid) -> mixdeck::models::Task {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = state.tasks.status(id).expect("task exists");
        if task.state.is_terminal() {
            return task;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "task {id} did not finish in time (state {:?})",
            task.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Decode a JSON response body
pub async fn body_json(body: axum::body::Body) -> serde_json::Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        panic!("body is not JSON: {e}: {}", String::from_utf8_lossy(&bytes))
    })
}

/// Build a JSON POST request
pub fn post_json(uri: &str, body: serde_json::Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

/// Build a GET request
pub fn get(uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}
