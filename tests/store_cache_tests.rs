//! Cache identity and invalidation semantics at the store boundary

mod helpers;

use helpers::{seed_file, test_state, wait_terminal, FakeExtractor, Pin};
use mixdeck::store::{Lookup, Store};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

async fn analyse(state: &mixdeck::AppState, music: &std::path::Path) {
    let app = mixdeck::build_router(state.clone());
    let response = tower::util::ServiceExt::oneshot(
        app,
        helpers::post_json(
            "/api/analysis/start",
            serde_json::json!({ "directories": [music] }),
        ),
    )
    .await
    .unwrap();
    let body = helpers::body_json(response.into_body()).await;
    let task_id: Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
    let task = wait_terminal(state, task_id).await;
    assert_eq!(task.state, mixdeck::models::TaskState::Completed);
}

#[tokio::test]
async fn test_cache_roundtrip_deep_equal() {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    let file = seed_file(&music, "b.wav", 20).canonicalize().unwrap();

    let extractor = Arc::new(FakeExtractor::new());
    extractor.pin("b", Pin::new(124.0, "Bbm", 0.6, 20.0));
    let state = test_state(&dir.path().join("data"), extractor, 2);
    analyse(&state, &music).await;

    let written = match state.store.lookup(&file).await.unwrap() {
        Lookup::Hit(entry) => entry,
        other => panic!("expected hit, got {other:?}"),
    };

    // a second store instance reading the same files must deep-equal
    let reopened = Store::init(&state.settings.cache_dir(), 30).unwrap();
    let reread = match reopened.lookup(&file).await.unwrap() {
        Lookup::Hit(entry) => entry,
        other => panic!("expected hit after reopen, got {other:?}"),
    };
    assert_eq!(written, reread);
    assert_eq!(reread.features.bpm, 124.0);
    assert_eq!(reread.features.camelot.to_string(), "8A");
}

/// The fast-reject path trusts (size, mtime). When content changes behind
/// an unchanged stat — which a backdated mtime can produce — the path
/// index keeps answering with the old content id until a forced overwrite
/// rehashes the file.
#[tokio::test]
async fn test_stat_fast_path_vs_forced_rehash() {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    let file = seed_file(&music, "b.wav", 20).canonicalize().unwrap();

    let extractor = Arc::new(FakeExtractor::new());
    extractor.pin("b", Pin::new(124.0, "Bbm", 0.6, 20.0));
    let state = test_state(&dir.path().join("data"), extractor.clone(), 2);
    analyse(&state, &music).await;

    let old_cid = state.store.get_by_path(&file).unwrap().content_id;

    // rewrite with same-length different bytes, then force the stat row
    // back to what the index would see after a backdated mtime
    let original_len = std::fs::metadata(&file).unwrap().len() as usize;
    std::fs::write(&file, vec![0xA5u8; original_len]).unwrap();
    let metadata = std::fs::metadata(&file).unwrap();

    let index_path = state.settings.cache_dir().join("index.json");
    let mut index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&index_path).unwrap()).unwrap();
    let row = index
        .get_mut(file.to_string_lossy().as_ref())
        .expect("path row exists");
    row["file_size"] = serde_json::json!(metadata.len());
    row["mtime"] = serde_json::json!(mixdeck::store::file_mtime(&metadata));
    std::fs::write(&index_path, serde_json::to_string_pretty(&index).unwrap()).unwrap();

    // a fresh store believes the fast path: same content id, cache hit
    let fooled = Store::init(&state.settings.cache_dir(), 30).unwrap();
    match fooled.lookup(&file).await.unwrap() {
        Lookup::Hit(entry) => assert_eq!(entry.content_id, old_cid),
        other => panic!("fast path should accept the stat row, got {other:?}"),
    }

    // forced re-analysis rehashes and lands on a new content id
    let fooled = Arc::new(fooled);
    let pool = mixdeck::services::WorkerPool::new(
        Arc::clone(&fooled),
        state.extractor.clone(),
        1,
        true, // overwrite_cache
    );
    let handle = state
        .tasks
        .submit(mixdeck::models::TaskKind::Analysis)
        .unwrap();
    handle.start().unwrap();
    handle.set_totals(1);
    let report = pool.run(vec![file.clone()], &handle).await;
    assert_eq!(report.analysed, 1);

    let new_cid = fooled.get_by_path(&file).unwrap().content_id;
    assert_ne!(new_cid, old_cid, "forced rehash must see the new bytes");
    // both entries exist under their own content ids
    assert_eq!(fooled.entry_count(), 2);
}

#[tokio::test]
async fn test_clear_and_cleanup_endpoint_counts() {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    seed_file(&music, "a.wav", 10);
    seed_file(&music, "b.wav", 12);

    let extractor = Arc::new(FakeExtractor::new());
    let state = test_state(&dir.path().join("data"), extractor, 2);
    analyse(&state, &music).await;
    assert_eq!(state.store.entry_count(), 2);

    let app = mixdeck::build_router(state.clone());
    let response = tower::util::ServiceExt::oneshot(
        app.clone(),
        helpers::post_json("/api/analysis/cache/cleanup", serde_json::json!({ "max_size_gb": 0.0 })),
    )
    .await
    .unwrap();
    let body = helpers::body_json(response.into_body()).await;
    assert_eq!(body["removed_entries"], 2);

    analyse(&state, &music).await;
    assert_eq!(state.store.entry_count(), 2);

    let response = tower::util::ServiceExt::oneshot(
        app,
        helpers::post_json("/api/analysis/cache/clear", serde_json::json!({})),
    )
    .await
    .unwrap();
    let body = helpers::body_json(response.into_body()).await;
    assert_eq!(body["removed_entries"], 2);
    assert_eq!(state.store.entry_count(), 0);
}

#[tokio::test]
async fn test_shutdown_flushes_index() {
    let dir = TempDir::new().unwrap();
    let music = dir.path().join("music");
    seed_file(&music, "a.wav", 10);

    let extractor = Arc::new(FakeExtractor::new());
    let state = test_state(&dir.path().join("data"), extractor, 1);
    analyse(&state, &music).await;

    state.store.shutdown().unwrap();
    let index_path = state.settings.cache_dir().join("index.json");
    let index: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(index_path).unwrap()).unwrap();
    assert_eq!(index.as_object().unwrap().len(), 1);
}
