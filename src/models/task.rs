//! Background task state machine
//!
//! Tasks progress through: pending → running → (completed | failed |
//! cancelled), plus the pending → cancelled short-circuit. A task record is
//! mutated only by the tokio task that owns it; everyone else reads
//! snapshots through the task manager.

use crate::error::ErrorCode;
use crate::models::playlist::Playlist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Most recent errors retained per task
pub const MAX_TASK_ERRORS: usize = 50;

/// What a task does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Analysis,
    PlaylistGeneration,
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// The allowed transition set
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Running)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
                | (TaskState::Running, TaskState::Cancelled)
        )
    }
}

/// One entry of a task's bounded error list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub code: ErrorCode,
    pub message: String,
}

/// Summary result of a completed analysis task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub total_files: usize,
    pub analysed: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub duration_seconds: f64,
}

/// Result payload, present only in the completed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskResult {
    Analysis(AnalysisSummary),
    Playlist(Playlist),
}

/// A background job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Time-ordered id, sortable by creation
    pub id: Uuid,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Percent complete in [0, 100], monotonic while running
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub processed_files: usize,
    /// One of the files in flight at the last observation; informational
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub error_count: usize,
    /// Bounded to the most recent [`MAX_TASK_ERRORS`]
    pub errors: Vec<TaskError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            kind,
            state: TaskState::Pending,
            progress: 0.0,
            created_at: now,
            started_at: None,
            updated_at: now,
            ended_at: None,
            total_files: 0,
            processed_files: 0,
            current_file: None,
            error_count: 0,
            errors: Vec::new(),
            result: None,
        }
    }

    /// Apply a state transition, enforcing the allowed set
    pub fn transition_to(&mut self, next: TaskState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "illegal task transition {:?} -> {:?}",
                self.state, next
            ));
        }
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        match next {
            TaskState::Running => self.started_at = Some(now),
            _ if next.is_terminal() => {
                self.ended_at = Some(now);
                if next == TaskState::Completed {
                    self.progress = 100.0;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Update progress; regressions are ignored so observers always see a
    /// non-decreasing series
    pub fn set_progress(&mut self, progress: f64) {
        let clamped = progress.clamp(0.0, 100.0);
        if clamped > self.progress {
            self.progress = clamped;
        }
        self.updated_at = Utc::now();
    }

    /// Append an error, keeping only the most recent window
    pub fn push_error(&mut self, error: TaskError) {
        self.error_count += 1;
        self.errors.push(error);
        if self.errors.len() > MAX_TASK_ERRORS {
            let drop = self.errors.len() - MAX_TASK_ERRORS;
            self.errors.drain(..drop);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new(TaskKind::Analysis);
        task.transition_to(TaskState::Running).unwrap();
        assert!(task.started_at.is_some());
        task.transition_to(TaskState::Completed).unwrap();
        assert_eq!(task.progress, 100.0);
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn test_pending_to_cancelled() {
        let mut task = Task::new(TaskKind::Analysis);
        task.transition_to(TaskState::Cancelled).unwrap();
        assert_eq!(task.state, TaskState::Cancelled);
        assert_eq!(task.processed_files, 0);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut task = Task::new(TaskKind::Analysis);
        assert!(task.transition_to(TaskState::Completed).is_err());

        task.transition_to(TaskState::Running).unwrap();
        task.transition_to(TaskState::Failed).unwrap();
        assert!(task.transition_to(TaskState::Running).is_err());
        assert!(task.transition_to(TaskState::Completed).is_err());
    }

    #[test]
    fn test_progress_monotonic() {
        let mut task = Task::new(TaskKind::Analysis);
        task.transition_to(TaskState::Running).unwrap();
        task.set_progress(40.0);
        task.set_progress(20.0); // regression ignored
        assert_eq!(task.progress, 40.0);
        task.set_progress(150.0); // clamped
        assert_eq!(task.progress, 100.0);
    }

    #[test]
    fn test_error_list_bounded() {
        let mut task = Task::new(TaskKind::Analysis);
        for i in 0..(MAX_TASK_ERRORS + 10) {
            task.push_error(TaskError {
                path: Some(format!("/music/{i}.wav")),
                code: ErrorCode::CorruptFile,
                message: "bad header".to_string(),
            });
        }
        assert_eq!(task.errors.len(), MAX_TASK_ERRORS);
        assert_eq!(task.error_count, MAX_TASK_ERRORS + 10);
        // oldest entries were dropped
        assert_eq!(task.errors[0].path.as_deref(), Some("/music/10.wav"));
    }

    #[test]
    fn test_task_ids_sort_by_creation() {
        let a = Task::new(TaskKind::Analysis);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Task::new(TaskKind::Analysis);
        assert!(a.id.to_string() < b.id.to_string());
    }
}
