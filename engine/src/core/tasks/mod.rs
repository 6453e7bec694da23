//! Task Tracking Module
//!
//! Status records for caller-initiated work, the store they live in, and the
//! event channel running tasks report through.

mod events;
mod store;

pub use events::*;
pub use store::*;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::media::StoredImage;
use crate::core::{new_task_id, FileId, Percent, TaskId};

// =============================================================================
// Task Types
// =============================================================================

/// What a task was started to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// Generate styles, then compose them into a video
    GenerateVideo,
    /// Generate styles only
    GenerateImages,
    /// Compose a selection of a previous task's images
    ComposeSelection,
    /// Compose explicitly listed stored images
    Regenerate,
}

/// Task lifecycle state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Started,
    Processing,
    ImagesReady,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::ImagesReady
                | TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
        )
    }

    /// Transition table. Terminal states accept nothing.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Started => matches!(next, Processing | Failed | Cancelled),
            Processing => matches!(
                next,
                Processing | ImagesReady | Completed | Failed | Cancelled
            ),
            ImagesReady | Completed | Failed | Cancelled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Started => "started",
            TaskStatus::Processing => "processing",
            TaskStatus::ImagesReady => "images_ready",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record of one task, as seen by pollers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: Percent,
    pub message: String,
    /// Stored source photo the task was started from
    pub source_file_id: Option<FileId>,
    /// Images persisted so far, in completion order
    pub images: Vec<StoredImage>,
    pub video_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRecord {
    pub fn new(kind: TaskKind) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: new_task_id(),
            kind,
            status: TaskStatus::Started,
            progress: 0.0,
            message: "Task started".to_string(),
            source_file_id: None,
            images: Vec::new(),
            video_path: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Shared stop flag for one task
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(Started.can_transition_to(Processing));
        assert!(Started.can_transition_to(Cancelled));
        assert!(!Started.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(ImagesReady));
        for terminal in [ImagesReady, Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Started, Processing, ImagesReady, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TaskStatus::ImagesReady).unwrap(),
            "images_ready"
        );
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_new_record() {
        let record = TaskRecord::new(TaskKind::GenerateImages);
        assert_eq!(record.status, TaskStatus::Started);
        assert_eq!(record.progress, 0.0);
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
        assert!(!record.is_done());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
