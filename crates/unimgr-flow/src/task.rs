//! Task records and their state machine.
//!
//! This module provides:
//! - `TaskState`: The state machine shared by top-level tasks and subtasks
//! - `TaskType`: The kind of work a task record describes
//! - `SubtaskGroupType`: The observer-facing label of a subtask group
//! - `TaskInfo`: The persisted execution record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unimgr_core::TaskId;

use crate::error::{Error, Result};

/// Task execution state machine.
///
/// ```text
/// ┌─────────┐  started   ┌─────────┐  ok    ┌─────────┐
/// │ CREATED │───────────►│ RUNNING │───────►│ SUCCESS │
/// └─────────┘            └─────────┘        └─────────┘
///      │                      │   │  error  ┌─────────┐
///      │                      │   └────────►│ FAILURE │
///      │                      │             └─────────┘
///      │                      ▼
///      │                 ┌─────────┐
///      └────────────────►│ ABORTED │
///       earlier failure  └─────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskState {
    /// Persisted, not yet started.
    #[default]
    Created,
    /// Actively executing.
    Running,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Failure,
    /// Never started, or stopped, because an earlier step failed.
    Aborted,
}

impl TaskState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Created => matches!(target, Self::Running | Self::Aborted),
            Self::Running => matches!(target, Self::Success | Self::Failure | Self::Aborted),
            Self::Success | Self::Failure | Self::Aborted => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
        }
    }

    /// Returns all valid target states from the current state.
    #[must_use]
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Created => vec![Self::Running, Self::Aborted],
            Self::Running => vec![Self::Success, Self::Failure, Self::Aborted],
            Self::Success | Self::Failure | Self::Aborted => vec![],
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// The kind of work a task record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskType {
    // --- Top-level lifecycle operations ---
    /// Tear down a cluster and its metadata.
    DestroyUniverse,
    /// Create or restore a backup.
    BackupUniverse,
    /// Delete a completed backup.
    DeleteBackup,
    /// Add a node to a cluster.
    AddNodeToUniverse,
    /// Remove a node from a cluster.
    RemoveNodeFromUniverse,
    /// Stop the processes on a node.
    StopNodeInUniverse,
    /// Start the tablet server on a stopped node.
    StartNodeInUniverse,
    /// Start a master process on a node.
    StartMasterOnNode,

    // --- Subtasks ---
    /// Remove encryption-at-rest key history.
    DestroyEncryptionAtRest,
    /// Create, edit or delete the cluster's DNS entry.
    DnsManipulation,
    /// Provision a node's instance.
    ProvisionServer,
    /// Write a node's server configuration.
    ConfigureServer,
    /// Start or stop a server process.
    ServerControl,
    /// Destroy a node's instance.
    DestroyServer,
    /// Record a node's lifecycle state.
    SetNodeState,
    /// Record a node's process roles.
    UpdateNodeProcess,
    /// Delete the cluster's registry entry.
    RemoveUniverseEntry,
    /// Update the monitoring scrape targets.
    MonitoringTargetUpdate,
    /// Back up one table.
    BackupTable,
    /// Restore one table.
    RestoreTable,
    /// Delete a backup's stored artifacts.
    DeleteBackupArtifacts,
    /// Record a backup's state.
    SetBackupState,
}

impl TaskType {
    /// Returns a human readable name for ledger descriptions and logs.
    #[must_use]
    pub const fn friendly_name(&self) -> &'static str {
        match self {
            Self::DestroyUniverse => "Destroy Universe",
            Self::BackupUniverse => "Backup Universe",
            Self::DeleteBackup => "Delete Backup",
            Self::AddNodeToUniverse => "Add Node",
            Self::RemoveNodeFromUniverse => "Remove Node",
            Self::StopNodeInUniverse => "Stop Node",
            Self::StartNodeInUniverse => "Start Node",
            Self::StartMasterOnNode => "Start Master",
            Self::DestroyEncryptionAtRest => "Destroy Encryption At Rest",
            Self::DnsManipulation => "DNS Manipulation",
            Self::ProvisionServer => "Provision Server",
            Self::ConfigureServer => "Configure Server",
            Self::ServerControl => "Server Control",
            Self::DestroyServer => "Destroy Server",
            Self::SetNodeState => "Set Node State",
            Self::UpdateNodeProcess => "Update Node Process",
            Self::RemoveUniverseEntry => "Remove Universe Entry",
            Self::MonitoringTargetUpdate => "Monitoring Target Update",
            Self::BackupTable => "Backup Table",
            Self::RestoreTable => "Restore Table",
            Self::DeleteBackupArtifacts => "Delete Backup Artifacts",
            Self::SetBackupState => "Set Backup State",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Serialized names double as the canonical identifier.
        let name = match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => name,
            _ => self.friendly_name().to_string(),
        };
        f.write_str(&name)
    }
}

/// The observer-facing label of a subtask group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SubtaskGroupType {
    /// No label; used by top-level tasks.
    #[default]
    Invalid,
    /// Provisioning instances.
    Provisioning,
    /// Writing configuration to servers.
    ConfigureUniverse,
    /// Starting tablet server processes.
    StartingNodeProcesses,
    /// Starting master processes.
    StartingMasterProcess,
    /// Stopping server processes.
    StoppingNodeProcesses,
    /// Tearing down servers and metadata.
    RemovingUnusedServers,
    /// Backing up tables.
    CreatingTableBackup,
    /// Restoring tables.
    RestoringTableBackup,
    /// Deleting backup artifacts.
    DeletingBackup,
}

impl SubtaskGroupType {
    /// Returns the status string shown to observers while this group runs.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::Provisioning => "Provisioning",
            Self::ConfigureUniverse => "Configuring Universe",
            Self::StartingNodeProcesses => "Starting Node Processes",
            Self::StartingMasterProcess => "Starting Master Process",
            Self::StoppingNodeProcesses => "Stopping Node Processes",
            Self::RemovingUnusedServers => "Removing Unused Servers",
            Self::CreatingTableBackup => "Creating Table Backup",
            Self::RestoringTableBackup => "Restoring Table Backup",
            Self::DeletingBackup => "Deleting Backup",
        }
    }
}

/// Persisted execution record for a top-level task or one of its subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Task identifier.
    pub id: TaskId,
    /// Parent task; `None` for top-level tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    /// Kind of work.
    pub task_type: TaskType,
    /// Current state.
    pub state: TaskState,
    /// Ordinal of the subtask's group within its parent's queue.
    pub position: u32,
    /// Label of the subtask's group.
    pub group_type: SubtaskGroupType,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// When the record reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Serialized parameters; for top-level tasks this is the retry snapshot.
    #[serde(default)]
    pub details: serde_json::Value,
    /// Error message recorded on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskInfo {
    /// Creates a top-level task record in `Created` state.
    #[must_use]
    pub fn top_level(task_type: TaskType, details: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            parent_id: None,
            task_type,
            state: TaskState::Created,
            position: 0,
            group_type: SubtaskGroupType::Invalid,
            created_at: now,
            updated_at: now,
            completed_at: None,
            details,
            error_message: None,
        }
    }

    /// Creates a subtask record in `Created` state.
    #[must_use]
    pub fn subtask(
        parent_id: TaskId,
        task_type: TaskType,
        position: u32,
        group_type: SubtaskGroupType,
        details: serde_json::Value,
    ) -> Self {
        let mut info = Self::top_level(task_type, details);
        info.parent_id = Some(parent_id);
        info.position = position;
        info.group_type = group_type;
        info
    }

    /// Returns true if the task is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transitions to a new state.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid.
    #[tracing::instrument(
        skip(self),
        fields(task_id = %self.id, task_type = %self.task_type, from = %self.state, to = %target)
    )]
    pub fn transition_to(&mut self, target: TaskState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: format!(
                    "valid transitions from {}: {:?}",
                    self.state,
                    self.state.valid_transitions()
                ),
            });
        }

        let now = Utc::now();
        if target.is_terminal() {
            self.completed_at = Some(now);
        }
        self.updated_at = now;
        self.state = target;
        Ok(())
    }

    /// Attempts to transition to a terminal state idempotently.
    ///
    /// Returns `Ok(true)` if the transition was applied and `Ok(false)` if the
    /// record already holds the same terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not terminal, or if the record holds
    /// a different terminal state.
    pub fn try_terminal_transition(
        &mut self,
        target: TaskState,
        error_message: Option<String>,
    ) -> Result<bool> {
        if !target.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: "try_terminal_transition requires a terminal state".to_string(),
            });
        }

        if self.state.is_terminal() {
            if self.state == target {
                return Ok(false);
            }
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: "cannot transition from one terminal state to another".to_string(),
            });
        }

        self.transition_to(target)?;
        if error_message.is_some() {
            self.error_message = error_message;
        }
        Ok(true)
    }
}
