//! Analysis worker pool
//!
//! Consumes the scanner's file list and produces cache entries, bounded by
//! `max_workers`. One producer feeds a bounded channel (capacity twice the
//! worker count) so backpressure propagates naturally from the extractor to
//! the producer. Files complete in arbitrary order; progress counts only
//! terminal files.

use crate::error::ErrorCode;
use crate::models::task::TaskError;
use crate::models::track::Features;
use crate::services::feature_extractor::{ExtractError, Extraction, ExtractorHandle};
use crate::services::mood_classifier::{self, MoodInputs};
use crate::services::task_manager::TaskHandle;
use crate::store::index::{compute_content_id, CacheEntry};
use crate::store::{file_mtime, Lookup, Store};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy for transient extraction errors
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(3);

/// How one file ended
#[derive(Debug)]
enum FileOutcome {
    CacheHit,
    Analysed,
    Failed(TaskError),
    /// Cancellation observed before the file reached a terminal state
    Skipped,
}

/// Counters accumulated across the pool
#[derive(Debug, Default)]
pub struct PoolReport {
    pub analysed: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Bounded-concurrency analysis executor
pub struct WorkerPool {
    store: Arc<Store>,
    extractor: ExtractorHandle,
    max_workers: usize,
    overwrite_cache: bool,
}

impl WorkerPool {
    pub fn new(
        store: Arc<Store>,
        extractor: ExtractorHandle,
        max_workers: usize,
        overwrite_cache: bool,
    ) -> Self {
        Self {
            store,
            extractor,
            max_workers: max_workers.max(1),
            overwrite_cache,
        }
    }

    /// Run the pool over a file list, reporting progress and errors through
    /// the task handle. Returns the aggregate counters; cancellation leaves
    /// the remaining files unprocessed.
    pub async fn run(&self, files: Vec<PathBuf>, handle: &TaskHandle) -> PoolReport {
        let (tx, rx) = tokio::sync::mpsc::channel::<PathBuf>(self.max_workers * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let cancel = handle.cancel_token();
        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for file in files {
                if producer_cancel.is_cancelled() {
                    break;
                }
                if tx.send(file).await.is_err() {
                    break;
                }
            }
            // dropping tx closes the channel and drains the workers
        });

        let analysed = Arc::new(AtomicUsize::new(0));
        let cache_hits = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let skipped = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(self.max_workers);
        for worker_id in 0..self.max_workers {
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            let handle = handle.clone();
            let store = Arc::clone(&self.store);
            let extractor = self.extractor.clone();
            let overwrite = self.overwrite_cache;
            let analysed = Arc::clone(&analysed);
            let cache_hits = Arc::clone(&cache_hits);
            let failed = Arc::clone(&failed);
            let skipped = Arc::clone(&skipped);

            workers.push(tokio::spawn(async move {
                loop {
                    // observe cancellation before pulling the next file
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(file) = rx.lock().await.recv().await else {
                        break;
                    };

                    tracing::debug!(worker_id, file = %file.display(), "worker picked file");
                    handle.set_current_file(Some(&file.to_string_lossy()));

                    let outcome =
                        process_file(&store, &extractor, &cancel, &file, overwrite).await;
                    match outcome {
                        FileOutcome::CacheHit => {
                            cache_hits.fetch_add(1, Ordering::Relaxed);
                            handle.file_done(Some(&file.to_string_lossy()));
                        }
                        FileOutcome::Analysed => {
                            analysed.fetch_add(1, Ordering::Relaxed);
                            handle.file_done(Some(&file.to_string_lossy()));
                        }
                        FileOutcome::Failed(error) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                file = %file.display(),
                                code = error.code.as_str(),
                                message = %error.message,
                                "file analysis failed"
                            );
                            handle.push_error(error);
                            handle.file_done(Some(&file.to_string_lossy()));
                        }
                        FileOutcome::Skipped => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }));
        }

        let _ = producer.await;
        for worker in workers {
            let _ = worker.await;
        }

        PoolReport {
            analysed: analysed.load(Ordering::Relaxed),
            cache_hits: cache_hits.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
            skipped: skipped.load(Ordering::Relaxed),
        }
    }
}

/// Per-file state machine:
/// received → cache check → extract (with retries) → write → terminal
async fn process_file(
    store: &Store,
    extractor: &ExtractorHandle,
    cancel: &tokio_util::sync::CancellationToken,
    path: &Path,
    overwrite: bool,
) -> FileOutcome {
    // cache fast path, skipped entirely when overwriting
    let content_id = if overwrite {
        match compute_content_id(path).await {
            Ok(cid) => cid,
            Err(err) => return FileOutcome::Failed(io_task_error(path, err)),
        }
    } else {
        match store.lookup(path).await {
            Ok(Lookup::Hit(_)) => return FileOutcome::CacheHit,
            Ok(Lookup::Miss { content_id }) => match content_id {
                Some(cid) => cid,
                None => match compute_content_id(path).await {
                    Ok(cid) => cid,
                    Err(err) => return FileOutcome::Failed(io_task_error(path, err)),
                },
            },
            Err(err) => {
                return FileOutcome::Failed(TaskError {
                    path: Some(path.to_string_lossy().to_string()),
                    code: ErrorCode::IoError,
                    message: err.to_string(),
                });
            }
        }
    };

    // extraction with retries for transient failures only
    let mut attempt = 0u32;
    let extraction = loop {
        if cancel.is_cancelled() {
            return FileOutcome::Skipped;
        }
        attempt += 1;
        match extractor.extract(path).await {
            Ok(extraction) => break extraction,
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .min(BACKOFF_CAP);
                tracing::debug!(
                    file = %path.display(),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "transient extraction error, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return FileOutcome::Failed(extract_task_error(path, &err)),
        }
    };

    if cancel.is_cancelled() {
        // in-flight work ran to completion; the result is discarded
        return FileOutcome::Skipped;
    }

    let entry = match build_entry(path, &content_id, extraction) {
        Ok(entry) => entry,
        Err(error) => return FileOutcome::Failed(error),
    };

    match store.write_entry(path, entry).await {
        Ok(()) => FileOutcome::Analysed,
        Err(err) => FileOutcome::Failed(TaskError {
            path: Some(path.to_string_lossy().to_string()),
            code: ErrorCode::IoError,
            message: format!("cache write failed: {err}"),
        }),
    }
}

/// Assemble the cache entry: reconcile key/Camelot, classify mood, and
/// enforce the feature invariants before anything touches disk
fn build_entry(
    path: &Path,
    content_id: &str,
    extraction: Extraction,
) -> Result<CacheEntry, TaskError> {
    let raw = &extraction.features;
    if let Err(err) = raw.check_contract() {
        return Err(extract_task_error(path, &err));
    }

    let camelot = crate::models::Camelot::from_key(&raw.key).ok_or_else(|| TaskError {
        path: Some(path.to_string_lossy().to_string()),
        code: ErrorCode::Internal,
        message: format!("extractor reported unknown key: {}", raw.key),
    })?;

    let verdict = mood_classifier::classify(&MoodInputs {
        energy: raw.energy,
        valence: raw.valence,
        bpm: raw.bpm,
        acousticness: raw.acousticness,
        minor_mode: camelot.is_minor(),
    });

    let features = Features {
        bpm: raw.bpm,
        key: camelot.key_name().to_string(),
        camelot,
        energy: raw.energy.clamp(0.0, 1.0),
        valence: raw.valence.clamp(0.0, 1.0),
        danceability: raw.danceability.clamp(0.0, 1.0),
        acousticness: raw.acousticness.clamp(0.0, 1.0),
        instrumentalness: raw.instrumentalness.clamp(0.0, 1.0),
        energy_timeseries: raw.energy_timeseries.clone(),
        stride_seconds: raw.stride_seconds,
        confidence: crate::models::Confidence {
            bpm: raw.confidence_bpm.clamp(0.0, 1.0),
            key: raw.confidence_key.clamp(0.0, 1.0),
            energy: raw.confidence_energy.clamp(0.0, 1.0),
            mood: verdict.confidence,
        },
        mood: verdict.mood,
        mood_scores: verdict.scores,
    };

    if let Err(reason) = features.validate(extraction.duration_seconds) {
        return Err(TaskError {
            path: Some(path.to_string_lossy().to_string()),
            code: ErrorCode::Internal,
            message: format!("extractor contract violation: {reason}"),
        });
    }

    let metadata = std::fs::metadata(path).map_err(|err| io_task_error(path, err))?;
    let format = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    Ok(CacheEntry {
        content_id: content_id.to_string(),
        path_at_write: path.to_path_buf(),
        file_size: metadata.len(),
        mtime: file_mtime(&metadata),
        analysis_version: crate::models::ANALYSIS_VERSION,
        analysed_at: Utc::now(),
        format,
        bitrate: extraction.bitrate,
        sample_rate: extraction.sample_rate,
        duration_seconds: extraction.duration_seconds,
        tags: extraction.tags,
        features,
    })
}

fn io_task_error(path: &Path, err: std::io::Error) -> TaskError {
    TaskError {
        path: Some(path.to_string_lossy().to_string()),
        code: ErrorCode::IoError,
        message: err.to_string(),
    }
}

fn extract_task_error(path: &Path, err: &ExtractError) -> TaskError {
    TaskError {
        path: Some(path.to_string_lossy().to_string()),
        code: err.code(),
        message: err.to_string(),
    }
}
