//! Background task registry
//!
//! Owns the map of active tasks and mediates between API callers and the
//! long-running work. Each task record is mutated only through the
//! [`TaskHandle`] held by its owning tokio task; API callers read cloned
//! snapshots. A sweeper removes terminal tasks after their retention
//! window.

use crate::error::{AppError, ErrorCode};
use crate::models::task::{Task, TaskError, TaskKind, TaskResult, TaskState};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Retention for completed tasks
fn retain_completed() -> ChronoDuration {
    ChronoDuration::hours(24)
}
/// Retention for failed and cancelled tasks
fn retain_failed() -> ChronoDuration {
    ChronoDuration::hours(1)
}
/// Sweep cadence
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Default ceiling on concurrently running tasks
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

struct TaskSlot {
    record: Arc<RwLock<Task>>,
    cancel: CancellationToken,
}

/// Shared task registry
pub struct TaskManager {
    slots: RwLock<HashMap<Uuid, TaskSlot>>,
    max_concurrent: usize,
}

/// How the owning future ended
pub enum TaskOutcome {
    Completed(TaskResult),
    Cancelled,
}

/// Discriminated answer for the result endpoint
#[derive(Debug, Clone)]
pub enum ResultStatus {
    Ready(TaskResult),
    Pending,
    Failed { errors: Vec<TaskError> },
    Cancelled,
}

impl TaskManager {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Register a new task. Never blocks; refuses with `busy` when the
    /// concurrent ceiling is reached.
    pub fn submit(&self, kind: TaskKind) -> Result<TaskHandle, AppError> {
        let mut slots = self.slots.write();
        let active = slots
            .values()
            .filter(|slot| !slot.record.read().state.is_terminal())
            .count();
        if active >= self.max_concurrent {
            return Err(AppError::busy(format!(
                "task ceiling reached ({active} running)"
            )));
        }

        let task = Task::new(kind);
        let id = task.id;
        let record = Arc::new(RwLock::new(task));
        let cancel = CancellationToken::new();
        slots.insert(
            id,
            TaskSlot {
                record: Arc::clone(&record),
                cancel: cancel.clone(),
            },
        );

        tracing::info!(task_id = %id, ?kind, "task submitted");
        Ok(TaskHandle { id, record, cancel })
    }

    /// Snapshot of one task
    pub fn status(&self, id: Uuid) -> Result<Task, AppError> {
        self.slots
            .read()
            .get(&id)
            .map(|slot| slot.record.read().clone())
            .ok_or_else(|| AppError::not_found(format!("task not found: {id}")))
    }

    /// Signal cooperative cancellation. Idempotent; a pending task is
    /// cancelled on the spot instead of waiting for its owner to notice.
    pub fn cancel(&self, id: Uuid) -> Result<(), AppError> {
        let slots = self.slots.read();
        let slot = slots
            .get(&id)
            .ok_or_else(|| AppError::not_found(format!("task not found: {id}")))?;
        slot.cancel.cancel();

        let mut record = slot.record.write();
        if record.state == TaskState::Pending {
            let _ = record.transition_to(TaskState::Cancelled);
        }
        tracing::info!(task_id = %id, state = ?record.state, "task cancel requested");
        Ok(())
    }

    /// The result endpoint's discriminated answer
    pub fn result(&self, id: Uuid) -> Result<ResultStatus, AppError> {
        let task = self.status(id)?;
        Ok(match task.state {
            TaskState::Completed => match task.result {
                Some(result) => ResultStatus::Ready(result),
                // completed without a payload is an invariant violation
                None => ResultStatus::Failed {
                    errors: vec![TaskError {
                        path: None,
                        code: ErrorCode::Internal,
                        message: "completed task has no result".to_string(),
                    }],
                },
            },
            TaskState::Failed => ResultStatus::Failed { errors: task.errors },
            TaskState::Cancelled => ResultStatus::Cancelled,
            TaskState::Pending | TaskState::Running => ResultStatus::Pending,
        })
    }

    /// All task snapshots, newest first (ids are time-ordered)
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .slots
            .read()
            .values()
            .map(|slot| slot.record.read().clone())
            .collect();
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        tasks
    }

    /// Drop terminal tasks past their retention window
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut slots = self.slots.write();
        slots.retain(|id, slot| {
            let record = slot.record.read();
            let retain = match record.state {
                TaskState::Completed => retain_completed(),
                TaskState::Failed | TaskState::Cancelled => retain_failed(),
                _ => return true,
            };
            let expired = record
                .ended_at
                .map(|ended| now.signed_duration_since(ended) > retain)
                .unwrap_or(false);
            if expired {
                tracing::debug!(task_id = %id, "sweeping expired task");
            }
            !expired
        });
    }

    /// Periodic sweeper loop; lives for the life of the process
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                manager.sweep();
            }
        });
    }

    /// Run a task body on its own tokio task, converting panics into a
    /// failure with error class `internal` so other tasks are unaffected
    pub fn spawn_supervised<F>(handle: TaskHandle, fut: F)
    where
        F: Future<Output = Result<TaskOutcome, AppError>> + Send + 'static,
    {
        tokio::spawn(async move {
            let id = handle.id;
            match tokio::spawn(fut).await {
                Ok(Ok(TaskOutcome::Completed(result))) => handle.complete(result),
                Ok(Ok(TaskOutcome::Cancelled)) => handle.mark_cancelled(),
                Ok(Err(err)) => {
                    tracing::error!(task_id = %id, error = %err, "task failed");
                    handle.fail(err.code(), err.to_string());
                }
                Err(join_err) => {
                    tracing::error!(task_id = %id, error = %join_err, "task panicked");
                    handle.fail(ErrorCode::Internal, format!("task panicked: {join_err}"));
                }
            }
        });
    }
}

/// Single-owner mutation interface for one task
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: Uuid,
    record: Arc<RwLock<Task>>,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// pending → running; fails when the task was cancelled before start
    pub fn start(&self) -> Result<(), AppError> {
        let mut record = self.record.write();
        if record.state == TaskState::Cancelled {
            return Err(AppError::conflict("task cancelled before start"));
        }
        record
            .transition_to(TaskState::Running)
            .map_err(AppError::internal)
    }

    pub fn set_totals(&self, total_files: usize) {
        let mut record = self.record.write();
        record.total_files = total_files;
        record.updated_at = Utc::now();
    }

    /// Record one more terminal file and refresh derived progress
    pub fn file_done(&self, current: Option<&str>) {
        let mut record = self.record.write();
        record.processed_files += 1;
        record.current_file = current.map(str::to_string);
        if record.total_files > 0 {
            let pct = record.processed_files as f64 / record.total_files as f64 * 100.0;
            // completion sets the exact 100
            let pct = pct.min(99.9);
            if pct > record.progress {
                record.progress = pct;
            }
        }
        record.updated_at = Utc::now();
    }

    pub fn set_current_file(&self, current: Option<&str>) {
        let mut record = self.record.write();
        record.current_file = current.map(str::to_string);
        record.updated_at = Utc::now();
    }

    pub fn set_progress(&self, progress: f64) {
        self.record.write().set_progress(progress);
    }

    pub fn push_error(&self, error: TaskError) {
        self.record.write().push_error(error);
    }

    pub fn snapshot(&self) -> Task {
        self.record.read().clone()
    }

    /// running → completed with the result payload; tolerant of a racing
    /// cancellation having already closed the task
    pub fn complete(&self, result: TaskResult) {
        let mut record = self.record.write();
        if record.state.is_terminal() {
            return;
        }
        if record.transition_to(TaskState::Completed).is_ok() {
            record.result = Some(result);
        }
    }

    pub fn fail(&self, code: ErrorCode, message: String) {
        let mut record = self.record.write();
        if record.state.is_terminal() {
            return;
        }
        record.push_error(TaskError {
            path: None,
            code,
            message,
        });
        let _ = record.transition_to(TaskState::Failed);
    }

    pub fn mark_cancelled(&self) {
        let mut record = self.record.write();
        if record.state.is_terminal() {
            return;
        }
        let _ = record.transition_to(TaskState::Cancelled);
    }
}
