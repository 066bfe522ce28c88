//! Tenant-facing record of submitted tasks ("customer tasks").
//!
//! Entries are append-only. The only mutation is the completion timestamp,
//! which is written once when the operation ends.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use unimgr_core::{TaskId, TenantId};

use crate::error::Result;

/// The kind of resource a task targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TargetType {
    /// A whole cluster.
    Universe,
    /// A single node; the target ID is its cluster.
    Node,
    /// A backup.
    Backup,
}

/// The operation a tenant requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CustomerTaskKind {
    /// Create a resource.
    Create,
    /// Delete a resource.
    Delete,
    /// Add a node.
    Add,
    /// Remove a node.
    Remove,
    /// Stop a node.
    Stop,
    /// Start a node.
    Start,
    /// Start a master process.
    StartMaster,
    /// Back up a cluster.
    Backup,
    /// Restore into a cluster.
    Restore,
}

impl CustomerTaskKind {
    /// Returns the verb shown while the task is running.
    #[must_use]
    pub const fn in_progress_verb(&self) -> &'static str {
        match self {
            Self::Create => "Creating",
            Self::Delete => "Deleting",
            Self::Add => "Adding",
            Self::Remove => "Removing",
            Self::Stop => "Stopping",
            Self::Start => "Starting",
            Self::StartMaster => "Starting Master",
            Self::Backup => "Backing up",
            Self::Restore => "Restoring",
        }
    }

    /// Returns the verb shown once the task has finished.
    #[must_use]
    pub const fn completed_verb(&self) -> &'static str {
        match self {
            Self::Create => "Created",
            Self::Delete => "Deleted",
            Self::Add => "Added",
            Self::Remove => "Removed",
            Self::Stop => "Stopped",
            Self::Start => "Started",
            Self::StartMaster => "Started Master",
            Self::Backup => "Backed up",
            Self::Restore => "Restored",
        }
    }
}

/// One submitted task as seen by its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLedgerEntry {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The top-level task.
    pub task_id: TaskId,
    /// Kind of target resource.
    pub target_type: TargetType,
    /// Target resource identifier.
    pub target_id: Uuid,
    /// Requested operation.
    pub kind: CustomerTaskKind,
    /// Human readable target description.
    pub description: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When the operation ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskLedgerEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        task_id: TaskId,
        target_type: TargetType,
        target_id: Uuid,
        kind: CustomerTaskKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            task_id,
            target_type,
            target_id,
            kind,
            description: description.into(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Returns a title such as `"Deleting Universe orders"`.
    #[must_use]
    pub fn friendly_title(&self) -> String {
        let verb = if self.completed_at.is_some() {
            self.kind.completed_verb()
        } else {
            self.kind.in_progress_verb()
        };
        format!("{verb} {:?} {}", self.target_type, self.description)
    }
}

/// Append-only storage for ledger entries.
#[async_trait]
pub trait TaskLedger: Send + Sync {
    /// Appends an entry.
    async fn append(&self, entry: TaskLedgerEntry) -> Result<()>;

    /// Records the completion time of a task's entry.
    ///
    /// The first write wins; returns false if the entry is missing or was
    /// already completed.
    async fn mark_completed(&self, task_id: &TaskId, at: DateTime<Utc>) -> Result<bool>;

    /// Gets a tenant's entry for a task.
    async fn get(&self, tenant_id: &TenantId, task_id: &TaskId) -> Result<Option<TaskLedgerEntry>>;

    /// Lists a tenant's entries, newest first, optionally for one target.
    async fn list(&self, tenant_id: &TenantId, target_id: Option<Uuid>)
    -> Result<Vec<TaskLedgerEntry>>;
}
