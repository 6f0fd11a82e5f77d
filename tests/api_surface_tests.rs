//! Router-level contract tests: response shapes, error envelope, track
//! queries, export

mod helpers;

use axum::http::StatusCode;
use helpers::{body_json, get, post_json, seed_file, test_state, wait_terminal, FakeExtractor, Pin};
use mixdeck::build_router;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

async fn analysed_app() -> (TempDir, mixdeck::AppState, axum::Router, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    seed_file(&music, "alpha.wav", 10);
    seed_file(&music, "beta.wav", 12);
    seed_file(&music, "gamma.wav", 14);

    let extractor = Arc::new(FakeExtractor::new());
    extractor.pin("alpha", Pin::new(120.0, "Am", 0.3, 180.0).with_artist("Aster"));
    extractor.pin("beta", Pin::new(126.0, "Bbm", 0.6, 200.0).with_artist("Borealis"));
    extractor.pin("gamma", Pin::new(140.0, "F#", 0.9, 220.0).with_artist("Borealis"));

    let state = test_state(&dir.path().join("data"), extractor, 2);
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/analysis/start",
            serde_json::json!({ "directories": [music] }),
        ))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    let task_id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
    wait_terminal(&state, task_id).await;

    // the store keys tracks by canonical path
    let music = music.canonicalize().unwrap();
    (dir, state, app, music)
}

#[tokio::test]
async fn test_health_shape() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir.path().join("data"), Arc::new(FakeExtractor::new()), 1);
    let app = build_router(state);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert!(body["components"]["cache"].is_string());
    assert!(body["components"]["analyzer"].is_string());
}

#[tokio::test]
async fn test_formats_endpoint() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir.path().join("data"), Arc::new(FakeExtractor::new()), 1);
    let app = build_router(state);

    let response = app.oneshot(get("/api/analysis/formats")).await.unwrap();
    let body = body_json(response.into_body()).await;
    let formats = body["formats"].as_array().unwrap();
    assert!(formats.iter().any(|f| f["extension"] == "flac"));
    assert!(formats.iter().any(|f| f["extension"] == "wav"));
}

#[tokio::test]
async fn test_error_envelope_shape() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir.path().join("data"), Arc::new(FakeExtractor::new()), 1);
    let app = build_router(state);

    let response = app
        .oneshot(get(&format!("/api/analysis/{}/status", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"].is_string());
    assert!(body["error"]["details"].is_null());
}

#[tokio::test]
async fn test_track_listing_filters_and_sorts() {
    let (_dir, _state, app, _music) = analysed_app().await;

    let response = app.clone().oneshot(get("/api/tracks")).await.unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["total"], 3);
    // default sort is (artist, title, path)
    let artists: Vec<&str> = body["tracks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["artist"].as_str().unwrap())
        .collect();
    assert_eq!(artists, vec!["Aster", "Borealis", "Borealis"]);

    let response = app
        .clone()
        .oneshot(get("/api/tracks?min_bpm=118&max_bpm=130"))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["total"], 2);

    let response = app
        .clone()
        .oneshot(get("/api/tracks?camelot=8A"))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["tracks"][0]["key"], "Bbm");

    let response = app
        .clone()
        .oneshot(get("/api/tracks?search=beta"))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["total"], 1);

    let response = app
        .clone()
        .oneshot(get("/api/tracks?sort_by=bpm&sort_order=desc&per_page=2&page=1"))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["tracks"][0]["bpm"], 140.0);
    assert_eq!(body["total_pages"], 2);

    let response = app
        .clone()
        .oneshot(get("/api/tracks?camelot=13Q"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_track_by_encoded_path_includes_timeseries() {
    let (_dir, _state, app, music) = analysed_app().await;

    let raw_path = music.join("beta.wav");
    let encoded: String = raw_path
        .to_string_lossy()
        .bytes()
        .map(|b| format!("%{b:02X}"))
        .collect();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/tracks/{encoded}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["features"]["bpm"], 126.0);
    assert!(
        body["features"]["energy_timeseries"].as_array().unwrap().len() >= 8,
        "full track view carries the time series"
    );

    let response = app
        .oneshot(get("/api/tracks/%2Fno%2Fsuch%2Ffile.wav"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_similar_search() {
    let (_dir, _state, app, music) = analysed_app().await;

    let reference = music.join("alpha.wav");
    let uri = format!(
        "/api/tracks/search/similar?track_path={}&limit=5&similarity_threshold=0.0",
        reference.to_string_lossy().replace('/', "%2F")
    );
    let response = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    // beta (126 bpm, minor) is closer to alpha (120, minor) than gamma (140, major)
    assert!(results[0]["path"].as_str().unwrap().ends_with("beta.wav"));
    assert!(results[0]["similarity"].as_f64().unwrap() >= results[1]["similarity"].as_f64().unwrap());
}

#[tokio::test]
async fn test_export_writes_file() {
    let (_dir, state, app, _music) = analysed_app().await;

    let playlist = serde_json::json!({
        "id": Uuid::new_v4(),
        "created_at": chrono::Utc::now().to_rfc3339(),
        "tracks": [
            {
                "path": "/music/one.wav",
                "transition_score": 0.0,
                "bpm": 124.0,
                "camelot": "8A",
                "title": "One",
                "artist": "Someone",
                "duration_seconds": 240.0
            }
        ],
        "metadata": {
            "total_duration_seconds": 240.0,
            "avg_bpm": 124.0,
            "energy_curve": [0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5,
                             0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
            "preset_name": "Peak Time",
            "truncated": false,
            "empty": false
        }
    });

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/playlists/export",
            serde_json::json!({
                "playlist_data": playlist,
                "format_type": "m3u",
                "filename": "my_set"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["filename"], "my_set.m3u");

    let written = state.settings.exports_dir().join("my_set.m3u");
    let content = std::fs::read_to_string(written).unwrap();
    assert!(content.contains("/music/one.wav"));

    // unknown format is an input error
    let response = app
        .oneshot(post_json(
            "/api/playlists/export",
            serde_json::json!({
                "playlist_data": playlist,
                "format_type": "cassette",
                "filename": "my_set"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cache_stats_shape() {
    let (_dir, _state, app, _music) = analysed_app().await;

    let response = app.oneshot(get("/api/analysis/cache/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["total_tracks"], 3);
    assert_eq!(body["analysed_tracks"], 3);
    assert!(body["cache_size_bytes"].as_u64().unwrap() > 0);
    assert!(body["bpm_histogram"].is_object());
    assert!(body["mood_histogram"].is_object());
}
