//! Analysis task body
//!
//! The API handler scans up front (so the caller learns the file count
//! immediately), then hands the file list to this pipeline running on the
//! task's own tokio task. The pipeline drives the worker pool and decides
//! the task's terminal state.

use crate::error::AppError;
use crate::models::task::{AnalysisSummary, TaskResult};
use crate::services::feature_extractor::ExtractorHandle;
use crate::services::task_manager::{TaskHandle, TaskOutcome};
use crate::services::worker_pool::WorkerPool;
use crate::store::Store;
use std::path::PathBuf;
use std::sync::Arc;

/// Execute one analysis task over a pre-scanned file list
pub async fn run_analysis(
    store: Arc<Store>,
    extractor: ExtractorHandle,
    max_workers: usize,
    overwrite_cache: bool,
    files: Vec<PathBuf>,
    handle: TaskHandle,
) -> Result<TaskOutcome, AppError> {
    if handle.is_cancelled() {
        return Ok(TaskOutcome::Cancelled);
    }
    handle.start()?;

    let started = std::time::Instant::now();
    let total = files.len();
    tracing::info!(
        task_id = %handle.id(),
        total_files = total,
        max_workers,
        overwrite_cache,
        "analysis task started"
    );

    let pool = WorkerPool::new(store, extractor, max_workers, overwrite_cache);
    let report = pool.run(files, &handle).await;

    if handle.is_cancelled() {
        tracing::info!(
            task_id = %handle.id(),
            processed = report.analysed + report.cache_hits + report.failed,
            "analysis task cancelled"
        );
        return Ok(TaskOutcome::Cancelled);
    }

    // Per-file failures are warnings; the task itself fails only when
    // nothing succeeded at all
    if total > 0 && report.failed == total {
        return Err(AppError::internal(format!(
            "all {total} files failed analysis"
        )));
    }

    let summary = AnalysisSummary {
        total_files: total,
        analysed: report.analysed,
        cache_hits: report.cache_hits,
        failed: report.failed,
        duration_seconds: started.elapsed().as_secs_f64(),
    };
    tracing::info!(
        task_id = %handle.id(),
        analysed = summary.analysed,
        cache_hits = summary.cache_hits,
        failed = summary.failed,
        duration_seconds = summary.duration_seconds,
        "analysis task completed"
    );
    Ok(TaskOutcome::Completed(TaskResult::Analysis(summary)))
}
