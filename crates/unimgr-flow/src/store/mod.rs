//! Pluggable storage for task records.
//!
//! The [`TaskStore`] trait persists top-level tasks and their subtasks.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: State transitions use compare-and-swap so a record's
//!   terminal state is written exactly once
//! - **Concurrent reads**: Observers read records while the runner writes them
//! - **Testability**: In-memory implementation for tests and single-process use

pub mod memory;

use async_trait::async_trait;

use unimgr_core::TaskId;

use crate::error::Result;
use crate::task::{TaskInfo, TaskState};

/// Result of a compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// Operation succeeded.
    Success,
    /// Record not found.
    NotFound,
    /// State didn't match expected value.
    StateMismatch {
        /// The actual state that was found.
        actual: TaskState,
    },
}

impl CasResult {
    /// Returns true if the operation succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the record was not found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Storage abstraction for task records.
///
/// ## CAS Semantics
///
/// `cas_state` is the only way to change a record's state. A runner that
/// loses a race observes `StateMismatch` instead of overwriting a terminal
/// state someone else wrote.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if a record with the same ID already exists.
    async fn insert(&self, task: &TaskInfo) -> Result<()>;

    /// Gets a record by ID.
    ///
    /// Returns `None` if the record does not exist.
    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskInfo>>;

    /// Atomically transitions a record if its current state matches `expected`.
    ///
    /// When the target is terminal, `error_message` is stored with it.
    ///
    /// # Returns
    ///
    /// - `CasResult::Success` if the transition was applied
    /// - `CasResult::NotFound` if the record doesn't exist
    /// - `CasResult::StateMismatch` if the current state doesn't match expected
    async fn cas_state(
        &self,
        task_id: &TaskId,
        expected: TaskState,
        target: TaskState,
        error_message: Option<String>,
    ) -> Result<CasResult>;

    /// Returns the subtasks of `parent_id` ordered by position, then by
    /// insertion order.
    async fn subtasks(&self, parent_id: &TaskId) -> Result<Vec<TaskInfo>>;

    /// Returns the failed subtasks of `parent_id`, latest position first.
    async fn failed_subtasks(&self, parent_id: &TaskId) -> Result<Vec<TaskInfo>> {
        let mut failed: Vec<TaskInfo> = self
            .subtasks(parent_id)
            .await?
            .into_iter()
            .filter(|t| t.state == TaskState::Failure)
            .collect();
        failed.sort_by(|a, b| b.position.cmp(&a.position));
        Ok(failed)
    }
}
