//! Subtask trait and basic implementations.
//!
//! A subtask is one unit of work inside a [`SubtaskGroup`](crate::queue::SubtaskGroup).
//! It performs a single side effect against a collaborator and reports
//! success or an error; the queue owns its task record and state.

use async_trait::async_trait;

use unimgr_core::{ClusterId, TaskId, TenantId};

use crate::error::{Error, Result};
use crate::task::TaskType;

/// Context for a subtask execution.
#[derive(Debug, Clone)]
pub struct SubtaskContext {
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Cluster the operation targets.
    pub cluster_id: ClusterId,
    /// The top-level task.
    pub parent_task_id: TaskId,
    /// This subtask's record.
    pub subtask_id: TaskId,
}

/// One unit of work inside a lifecycle operation.
#[async_trait]
pub trait Subtask: Send + Sync {
    /// Returns the subtask's type, recorded on its task record.
    fn task_type(&self) -> TaskType;

    /// Returns the detail payload recorded on its task record.
    fn details(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Executes the subtask.
    async fn run(&self, ctx: &SubtaskContext) -> Result<()>;
}

/// A subtask that immediately succeeds.
#[derive(Debug)]
pub struct NoOpSubtask {
    task_type: TaskType,
}

impl NoOpSubtask {
    /// Creates a no-op subtask recorded as `task_type`.
    #[must_use]
    pub const fn new(task_type: TaskType) -> Self {
        Self { task_type }
    }
}

#[async_trait]
impl Subtask for NoOpSubtask {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        Ok(())
    }
}

/// A subtask that always fails with a configurable message.
#[derive(Debug)]
pub struct FailingSubtask {
    task_type: TaskType,
    message: String,
}

impl FailingSubtask {
    /// Creates a failing subtask recorded as `task_type`.
    #[must_use]
    pub fn new(task_type: TaskType, message: impl Into<String>) -> Self {
        Self {
            task_type,
            message: message.into(),
        }
    }
}

#[async_trait]
impl Subtask for FailingSubtask {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        Err(Error::collaborator("subtask", self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SubtaskContext {
        SubtaskContext {
            tenant_id: TenantId::generate(),
            cluster_id: ClusterId::generate(),
            parent_task_id: TaskId::generate(),
            subtask_id: TaskId::generate(),
        }
    }

    #[tokio::test]
    async fn noop_subtask_succeeds() {
        let subtask = NoOpSubtask::new(TaskType::SetNodeState);
        assert!(subtask.run(&ctx()).await.is_ok());
        assert_eq!(subtask.task_type(), TaskType::SetNodeState);
        assert!(subtask.details().is_null());
    }

    #[tokio::test]
    async fn failing_subtask_fails() {
        let subtask = FailingSubtask::new(TaskType::DestroyServer, "instance stuck");
        let err = subtask.run(&ctx()).await;
        assert!(err.is_err_and(|e| e.to_string().contains("instance stuck")));
    }
}
