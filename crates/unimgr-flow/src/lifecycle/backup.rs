//! Backup, restore and backup deletion.

use async_trait::async_trait;

use unimgr_core::{BackupId, ClusterId};

use super::subtasks::{DeleteBackupArtifacts, SetBackupState, TableCopy, TableCopySubtask};
use super::{
    BackupParams, DeleteBackupParams, Dependencies, LifecycleOperation, LockPolicy,
    OperationScope,
};
use crate::backup::{Backup, BackupAction, BackupState};
use crate::error::{Error, Result};
use crate::queue::{SubtaskGroup, SubtaskGroupQueue};
use crate::task::{SubtaskGroupType, TaskType};

/// Copies tables to storage, or restores them into a cluster.
///
/// The backup record is created at admission; this operation only drives
/// its state. Table copies of a backup run concurrently up to the requested
/// parallelism; restores run one table at a time.
#[derive(Debug, Clone)]
pub struct BackupOperation {
    action: BackupAction,
    params: BackupParams,
}

impl BackupOperation {
    /// Creates the operation.
    #[must_use]
    pub const fn new(action: BackupAction, params: BackupParams) -> Self {
        Self { action, params }
    }

    const fn group_type(&self) -> SubtaskGroupType {
        match self.action {
            BackupAction::Create => SubtaskGroupType::CreatingTableBackup,
            BackupAction::Restore => SubtaskGroupType::RestoringTableBackup,
        }
    }
}

async fn load_backup(deps: &Dependencies, backup_id: &BackupId) -> Result<Backup> {
    deps.backups.get(backup_id).await?.ok_or(Error::BackupNotFound {
        backup_id: *backup_id,
    })
}

#[async_trait]
impl LifecycleOperation for BackupOperation {
    fn task_type(&self) -> TaskType {
        TaskType::BackupUniverse
    }

    fn cluster_id(&self) -> ClusterId {
        self.params.cluster_id
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::Exclusive {
            expected_version: None,
            force: false,
        }
    }

    async fn build_queue(
        &self,
        scope: &OperationScope,
        deps: &Dependencies,
    ) -> Result<SubtaskGroupQueue> {
        scope.cluster()?;
        let backup = load_backup(deps, &self.params.backup_id).await?;
        if backup.cluster_id != scope.cluster_id {
            return Err(Error::InvalidRequest {
                message: format!(
                    "backup {} belongs to cluster {}",
                    backup.id, backup.cluster_id
                ),
            });
        }

        let mut queue = scope.queue();
        let (name, direction) = match self.action {
            BackupAction::Create => ("backup tables", TableCopy::Backup),
            BackupAction::Restore => ("restore tables", TableCopy::Restore),
        };
        let mut copies = SubtaskGroup::new(name, self.group_type());
        let parallelism = match self.action {
            BackupAction::Create => self.params.parallelism,
            BackupAction::Restore => Some(std::num::NonZeroUsize::MIN),
        };
        if let Some(limit) = parallelism {
            copies = copies.with_parallelism(limit);
        }
        for table in &backup.tables {
            copies.push(TableCopySubtask {
                executor: deps.backup_executor.clone(),
                backup: backup.clone(),
                table: table.clone(),
                direction,
            });
        }
        queue.add(copies);

        let mut complete = SubtaskGroup::new("mark backup completed", self.group_type());
        complete.push(SetBackupState {
            backups: deps.backups.clone(),
            backup_id: backup.id,
            state: BackupState::Completed,
        });
        queue.add(complete);

        Ok(queue)
    }

    async fn on_failure(
        &self,
        _scope: &OperationScope,
        deps: &Dependencies,
        _error: &Error,
    ) -> Result<()> {
        let backup = load_backup(deps, &self.params.backup_id).await?;
        if backup.state == BackupState::InProgress {
            deps.backups
                .set_state(&backup.id, BackupState::Failed)
                .await?;
            tracing::info!(backup_id = %backup.id, "backup marked failed");
        }
        Ok(())
    }
}

/// Deletes a completed backup's stored artifacts.
///
/// Runs without the cluster lock: deleting artifacts never mutates the
/// cluster, and the source cluster may no longer exist.
#[derive(Debug, Clone)]
pub struct DeleteBackupOperation {
    params: DeleteBackupParams,
}

impl DeleteBackupOperation {
    /// Creates the operation.
    #[must_use]
    pub const fn new(params: DeleteBackupParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl LifecycleOperation for DeleteBackupOperation {
    fn task_type(&self) -> TaskType {
        TaskType::DeleteBackup
    }

    fn cluster_id(&self) -> ClusterId {
        self.params.cluster_id
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::Unlocked
    }

    async fn build_queue(
        &self,
        scope: &OperationScope,
        deps: &Dependencies,
    ) -> Result<SubtaskGroupQueue> {
        let backup = load_backup(deps, &self.params.backup_id).await?;
        if backup.state != BackupState::Completed {
            return Err(Error::BackupNotCompleted {
                backup_id: backup.id,
                state: backup.state.to_string(),
            });
        }

        let mut queue = scope.queue();
        let mut artifacts =
            SubtaskGroup::new("delete backup artifacts", SubtaskGroupType::DeletingBackup);
        artifacts.push(DeleteBackupArtifacts {
            executor: deps.backup_executor.clone(),
            backup: backup.clone(),
        });
        queue.add(artifacts);

        let mut deleted = SubtaskGroup::new("mark backup deleted", SubtaskGroupType::DeletingBackup);
        deleted.push(SetBackupState {
            backups: deps.backups.clone(),
            backup_id: backup.id,
            state: BackupState::Deleted,
        });
        queue.add(deleted);

        Ok(queue)
    }
}
