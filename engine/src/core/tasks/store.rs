//! Task Store
//!
//! Narrow interface over task records. Status changes go through the
//! transition table; progress never moves backwards.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{TaskRecord, TaskStatus};
use crate::core::{CoreError, CoreResult, Percent};

/// Field update applied under the store lock
pub type TaskMutation<'a> = Box<dyn FnOnce(&mut TaskRecord) + Send + 'a>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Snapshot of a record
    async fn get(&self, task_id: &str) -> CoreResult<TaskRecord>;

    /// Inserts or replaces a record
    async fn upsert(&self, record: TaskRecord);

    /// Applies `f` atomically. A status change made by `f` must be allowed
    /// by the transition table, otherwise the record is left untouched.
    async fn mutate(&self, task_id: &str, f: TaskMutation<'_>) -> CoreResult<TaskRecord>;

    /// Moves a task to `next` with a status message. Rejected when the
    /// transition table forbids it, including any move out of a terminal state.
    async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        message: &str,
    ) -> CoreResult<TaskRecord>;

    /// Records progress on a running task; ignored once it is terminal
    async fn record_progress(
        &self,
        task_id: &str,
        percent: Percent,
        message: &str,
    ) -> CoreResult<TaskRecord> {
        let message = message.to_string();
        self.mutate(
            task_id,
            Box::new(move |record| {
                if record.status.is_terminal() {
                    return;
                }
                if record.status == TaskStatus::Started {
                    record.status = TaskStatus::Processing;
                }
                if percent > record.progress {
                    record.progress = percent.min(100.0);
                }
                record.message = message;
            }),
        )
        .await
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get(&self, task_id: &str) -> CoreResult<TaskRecord> {
        self.records
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))
    }

    async fn upsert(&self, record: TaskRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    async fn mutate(&self, task_id: &str, f: TaskMutation<'_>) -> CoreResult<TaskRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;

        let mut updated = record.clone();
        f(&mut updated);

        let (from, to) = (record.status, updated.status);
        if from != to {
            check_transition(task_id, from, to)?;
            debug!(task_id, %from, %to, "Task status changed");
        }
        Ok(commit(record, updated))
    }

    async fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        message: &str,
    ) -> CoreResult<TaskRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        check_transition(task_id, record.status, next)?;
        debug!(task_id, from = %record.status, to = %next, "Task status changed");

        let mut updated = record.clone();
        updated.status = next;
        updated.message = message.to_string();
        if matches!(next, TaskStatus::ImagesReady | TaskStatus::Completed) {
            updated.progress = 100.0;
        }
        Ok(commit(record, updated))
    }
}

fn check_transition(task_id: &str, from: TaskStatus, to: TaskStatus) -> CoreResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            task_id: task_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn commit(slot: &mut TaskRecord, mut updated: TaskRecord) -> TaskRecord {
    if updated.progress < slot.progress {
        updated.progress = slot.progress;
    }
    updated.touch();
    *slot = updated.clone();
    updated
}
