//! Read-only progress projection over task records.
//!
//! The tracker never takes a lock of its own; it reads whatever the
//! [`TaskStore`] returns while a queue is running, so observers may poll
//! concurrently with execution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use unimgr_core::TaskId;

use crate::error::{Error, Result};
use crate::store::TaskStore;
use crate::task::{TaskInfo, TaskState};

/// Observer-facing status of a top-level task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Percentage of subtasks that succeeded, 0 to 100.
    pub percent: u8,
    /// State of the top-level task.
    pub state: TaskState,
    /// Short summary of the furthest group that has started.
    pub status: String,
    /// Failure detail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of subtasks recorded for the task.
    pub subtask_count: usize,
}

impl TaskStatus {
    /// Returns true if the task reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Derives [`TaskStatus`] from a task and its subtasks.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn TaskStore>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker").finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Creates a tracker reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Returns the status of a top-level task.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if no such task exists, or a storage error.
    pub async fn get_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })?;
        let subtasks = self.store.subtasks(task_id).await?;
        Ok(project(&task, &subtasks))
    }
}

/// Computes the status of `task` from its subtask records.
#[must_use]
pub fn project(task: &TaskInfo, subtasks: &[TaskInfo]) -> TaskStatus {
    TaskStatus {
        percent: percent_complete(task, subtasks),
        state: task.state,
        status: status_line(task, subtasks),
        error: error_detail(task, subtasks),
        subtask_count: subtasks.len(),
    }
}

fn percent_complete(task: &TaskInfo, subtasks: &[TaskInfo]) -> u8 {
    if task.state == TaskState::Success {
        return 100;
    }
    if subtasks.is_empty() {
        return 0;
    }
    let succeeded = subtasks
        .iter()
        .filter(|t| t.state == TaskState::Success)
        .count();
    // Only a successful top-level task reports 100.
    let percent = (succeeded * 100 / subtasks.len()).min(99);
    u8::try_from(percent).unwrap_or(99)
}

fn status_line(task: &TaskInfo, subtasks: &[TaskInfo]) -> String {
    subtasks
        .iter()
        .filter(|t| !matches!(t.state, TaskState::Created | TaskState::Aborted))
        .max_by_key(|t| t.position)
        .map_or_else(
            || task.state.to_string(),
            |t| t.group_type.display_name().to_string(),
        )
}

fn error_detail(task: &TaskInfo, subtasks: &[TaskInfo]) -> Option<String> {
    if task.error_message.is_some() {
        return task.error_message.clone();
    }
    subtasks
        .iter()
        .filter(|t| t.state == TaskState::Failure)
        .max_by_key(|t| (t.position, t.updated_at))
        .and_then(|t| t.error_message.clone())
}
