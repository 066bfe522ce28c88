//! Lifecycle operations and the envelope they run in.
//!
//! Every operation is one variant of [`TaskParams`]. A variant converts into a
//! [`LifecycleOperation`], which declares its lock policy and builds its
//! [`SubtaskGroupQueue`]; [`run_lifecycle`] supplies everything else:
//!
//! 1. Mark the top-level task `Running`
//! 2. Acquire the cluster lock per the operation's [`LockPolicy`]
//! 3. Build and run the queue
//! 4. Release the lock if it was taken, on every exit path
//! 5. Run the success or failure hook
//! 6. Write the terminal task state and the ledger completion time

mod backup;
mod destroy;
mod node_action;
pub mod subtasks;
mod template;
#[cfg(test)]
pub(crate) mod testing;

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use unimgr_core::{BackupId, ClusterId, TaskId, TenantId};

pub use backup::{BackupOperation, DeleteBackupOperation};
pub use destroy::DestroyOperation;
pub use node_action::NodeActionOperation;
pub use template::run_lifecycle;

use crate::backup::{Backup, BackupAction, BackupExecutor, BackupStore, TableRef};
use crate::certificate::CertificateDirectory;
use crate::cluster::{Cluster, NodeActionType};
use crate::error::{Error, Result};
use crate::kms::KeyHistory;
use crate::ledger::TaskLedger;
use crate::queue::{QueueScope, SubtaskGroupQueue};
use crate::registry::ClusterRegistry;
use crate::services::{AlertManager, DnsManager, MonitoringTargets, NodeManager};
use crate::store::TaskStore;
use crate::task::TaskType;

/// Parameters of a submitted lifecycle operation.
///
/// Serialized into the top-level task's details; the snapshot is what a
/// retry resubmits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TaskParams {
    /// Tear a cluster down.
    DestroyUniverse(DestroyParams),
    /// Back up tables of a cluster.
    CreateBackup(BackupParams),
    /// Restore tables into a cluster.
    RestoreBackup(BackupParams),
    /// Delete a completed backup's artifacts.
    DeleteBackup(DeleteBackupParams),
    /// Act on one node of a cluster.
    NodeAction(NodeActionParams),
}

/// Parameters for destroying a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyParams {
    /// Cluster to destroy.
    pub cluster_id: ClusterId,
    /// Take the lock even if held and keep tearing down past failures.
    #[serde(default)]
    pub force: bool,
}

/// Parameters for a backup or restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupParams {
    /// Source (backup) or destination (restore) cluster.
    pub cluster_id: ClusterId,
    /// Identifier of the backup record the operation drives.
    pub backup_id: BackupId,
    /// Storage configuration holding the artifacts.
    pub storage_config_id: Uuid,
    /// Artifact location within the storage configuration.
    pub storage_location: String,
    /// Tables to copy.
    pub tables: Vec<TableRef>,
    /// Maximum tables copied at once; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<NonZeroUsize>,
}

/// Parameters for deleting a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBackupParams {
    /// Backup to delete.
    pub backup_id: BackupId,
    /// Cluster the backup was taken from.
    pub cluster_id: ClusterId,
}

impl DeleteBackupParams {
    /// Builds the parameters for deleting `backup`.
    #[must_use]
    pub const fn for_backup(backup: &Backup) -> Self {
        Self {
            backup_id: backup.id,
            cluster_id: backup.cluster_id,
        }
    }
}

/// Parameters for a node action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeActionParams {
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Target node.
    pub node_name: String,
    /// Requested action.
    pub action: NodeActionType,
    /// Cluster version the caller acted on; `None` accepts any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl TaskParams {
    /// Returns the top-level task type.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAction` for a node action that has no task.
    pub fn task_type(&self) -> Result<TaskType> {
        match self {
            Self::DestroyUniverse(_) => Ok(TaskType::DestroyUniverse),
            Self::CreateBackup(_) | Self::RestoreBackup(_) => Ok(TaskType::BackupUniverse),
            Self::DeleteBackup(_) => Ok(TaskType::DeleteBackup),
            Self::NodeAction(p) => p.action.task_type().ok_or_else(|| Error::UnsupportedAction {
                action: p.action.to_string(),
            }),
        }
    }

    /// Returns the cluster the operation targets.
    #[must_use]
    pub const fn cluster_id(&self) -> ClusterId {
        match self {
            Self::DestroyUniverse(p) => p.cluster_id,
            Self::CreateBackup(p) | Self::RestoreBackup(p) => p.cluster_id,
            Self::DeleteBackup(p) => p.cluster_id,
            Self::NodeAction(p) => p.cluster_id,
        }
    }

    /// Returns the backup action for backup and restore parameters.
    #[must_use]
    pub const fn backup_action(&self) -> Option<BackupAction> {
        match self {
            Self::CreateBackup(_) => Some(BackupAction::Create),
            Self::RestoreBackup(_) => Some(BackupAction::Restore),
            _ => None,
        }
    }

    /// Serializes the parameters into a task details payload.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_details(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Restores parameters from a task details payload.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload is not a params snapshot.
    pub fn from_details(details: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(details.clone())?)
    }

    /// Converts the parameters into the operation that executes them.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAction` for a node action that has no task.
    pub fn into_operation(self) -> Result<Box<dyn LifecycleOperation>> {
        let op: Box<dyn LifecycleOperation> = match self {
            Self::DestroyUniverse(p) => Box::new(DestroyOperation::new(p)),
            Self::CreateBackup(p) => Box::new(BackupOperation::new(BackupAction::Create, p)),
            Self::RestoreBackup(p) => Box::new(BackupOperation::new(BackupAction::Restore, p)),
            Self::DeleteBackup(p) => Box::new(DeleteBackupOperation::new(p)),
            Self::NodeAction(p) => Box::new(NodeActionOperation::new(p)?),
        };
        Ok(op)
    }
}

/// How an operation holds its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Take the cluster's exclusive lock for the whole run.
    Exclusive {
        /// Version the cluster must be at; `None` accepts any.
        expected_version: Option<u64>,
        /// Take the lock even if another operation holds it.
        force: bool,
    },
    /// Run without the cluster lock.
    Unlocked,
}

/// Shared capabilities available to every operation.
#[derive(Clone)]
pub struct Dependencies {
    /// Cluster records.
    pub registry: Arc<dyn ClusterRegistry>,
    /// Task records.
    pub tasks: Arc<dyn TaskStore>,
    /// Customer task ledger.
    pub ledger: Arc<dyn TaskLedger>,
    /// Backup records.
    pub backups: Arc<dyn BackupStore>,
    /// Certificate lookup.
    pub certificates: Arc<dyn CertificateDirectory>,
    /// Encryption key history.
    pub key_history: Arc<dyn KeyHistory>,
    /// Node provisioning and process control.
    pub node_manager: Arc<dyn NodeManager>,
    /// DNS records.
    pub dns: Arc<dyn DnsManager>,
    /// Monitoring scrape targets.
    pub monitoring: Arc<dyn MonitoringTargets>,
    /// Alert resolution.
    pub alerts: Arc<dyn AlertManager>,
    /// Backup data movement.
    pub backup_executor: Arc<dyn BackupExecutor>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}

/// Identity of one running operation and the cluster snapshot it works on.
#[derive(Debug, Clone)]
pub struct OperationScope {
    /// The top-level task.
    pub task_id: TaskId,
    /// Submitting tenant.
    pub tenant_id: TenantId,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Snapshot taken when the lock was acquired (or read, if unlocked).
    pub cluster: Option<Cluster>,
}

impl OperationScope {
    /// Creates a scope with no cluster snapshot yet.
    #[must_use]
    pub const fn new(task_id: TaskId, tenant_id: TenantId, cluster_id: ClusterId) -> Self {
        Self {
            task_id,
            tenant_id,
            cluster_id,
            cluster: None,
        }
    }

    /// Returns the cluster snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ClusterNotFound` if no snapshot was taken.
    pub fn cluster(&self) -> Result<&Cluster> {
        self.cluster.as_ref().ok_or(Error::ClusterNotFound {
            cluster_id: self.cluster_id,
        })
    }

    /// Creates an empty queue owned by this operation.
    #[must_use]
    pub const fn queue(&self) -> SubtaskGroupQueue {
        SubtaskGroupQueue::new(QueueScope {
            tenant_id: self.tenant_id,
            cluster_id: self.cluster_id,
            parent_task_id: self.task_id,
        })
    }
}

/// One kind of lifecycle operation.
#[async_trait]
pub trait LifecycleOperation: Send + Sync {
    /// Returns the top-level task type.
    fn task_type(&self) -> TaskType;

    /// Returns the target cluster.
    fn cluster_id(&self) -> ClusterId;

    /// Returns how the operation holds its cluster.
    fn lock_policy(&self) -> LockPolicy;

    /// Builds the operation's queue against the scope's cluster snapshot.
    async fn build_queue(
        &self,
        scope: &OperationScope,
        deps: &Dependencies,
    ) -> Result<SubtaskGroupQueue>;

    /// Runs after the queue succeeded and the lock was released.
    ///
    /// Errors are logged and do not fail the operation.
    async fn on_success(&self, _scope: &OperationScope, _deps: &Dependencies) -> Result<()> {
        Ok(())
    }

    /// Runs after the operation failed at any step.
    ///
    /// Errors are logged; the original failure is what the task records.
    async fn on_failure(
        &self,
        _scope: &OperationScope,
        _deps: &Dependencies,
        _error: &Error,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_snapshot_round_trips_through_details() -> Result<()> {
        let params = TaskParams::NodeAction(NodeActionParams {
            cluster_id: ClusterId::generate(),
            node_name: "n1".into(),
            action: NodeActionType::StartMaster,
            expected_version: Some(7),
        });
        let details = params.to_details()?;
        assert_eq!(details["operation"], "node_action");
        assert_eq!(details["action"], "START_MASTER");
        assert_eq!(TaskParams::from_details(&details)?, params);
        Ok(())
    }

    #[test]
    fn query_action_has_no_operation() {
        let params = TaskParams::NodeAction(NodeActionParams {
            cluster_id: ClusterId::generate(),
            node_name: "n1".into(),
            action: NodeActionType::Query,
            expected_version: None,
        });
        assert!(matches!(params.task_type(), Err(Error::UnsupportedAction { .. })));
        assert!(matches!(
            params.into_operation(),
            Err(Error::UnsupportedAction { .. })
        ));
    }

    #[test]
    fn backup_and_restore_share_a_task_type() -> Result<()> {
        let p = BackupParams {
            cluster_id: ClusterId::generate(),
            backup_id: BackupId::generate(),
            storage_config_id: Uuid::new_v4(),
            storage_location: "s3://bucket/a".into(),
            tables: vec![TableRef::keyspace("ks")],
            parallelism: None,
        };
        assert_eq!(TaskParams::CreateBackup(p.clone()).task_type()?, TaskType::BackupUniverse);
        assert_eq!(
            TaskParams::RestoreBackup(p).backup_action(),
            Some(BackupAction::Restore)
        );
        Ok(())
    }

    #[test]
    fn garbage_details_are_a_serialization_error() {
        let err = TaskParams::from_details(&serde_json::json!({"operation": "reboot"}));
        assert!(matches!(err, Err(Error::Serialization { .. })));
    }
}
