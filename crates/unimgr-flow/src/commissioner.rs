//! Submission API for lifecycle operations.
//!
//! The commissioner runs admission synchronously, persists the task record
//! and ledger entry, and hands the operation to a bounded worker pool.
//! Callers get a task id back immediately and observe the outcome through
//! [`Commissioner::get_status`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument as _;
use uuid::Uuid;

use unimgr_core::{BackupId, TaskId, TenantId};

use crate::admission::admit;
use crate::backup::BackupState;
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::ledger::TaskLedgerEntry;
use crate::lifecycle::{
    DeleteBackupParams, Dependencies, LifecycleOperation, TaskParams, run_lifecycle,
};
use crate::metrics::OrchestratorMetrics;
use crate::progress::{ProgressTracker, TaskStatus};
use crate::queue::QueueOptions;
use crate::store::CasResult;
use crate::task::{TaskInfo, TaskState};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Internal {
        message: "task handle map poisoned".into(),
    }
}

/// A ledger entry with its current progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// Ledger entry of the task.
    pub entry: TaskLedgerEntry,
    /// Title such as `"Deleting Universe orders"`.
    pub title: String,
    /// Current progress.
    pub status: TaskStatus,
}

/// Submits, tracks and retries lifecycle operations.
pub struct Commissioner {
    deps: Dependencies,
    options: QueueOptions,
    progress: ProgressTracker,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    handles: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl std::fmt::Debug for Commissioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commissioner")
            .field("options", &self.options)
            .field("available_workers", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl Commissioner {
    /// Creates a commissioner over `deps` sized by `config`.
    #[must_use]
    pub fn new(deps: Dependencies, config: &OrchestratorConfig) -> Self {
        Self::with_metrics(deps, config, OrchestratorMetrics::new())
    }

    /// Creates a commissioner that records into `metrics`.
    #[must_use]
    pub fn with_metrics(
        deps: Dependencies,
        config: &OrchestratorConfig,
        metrics: OrchestratorMetrics,
    ) -> Self {
        let progress = ProgressTracker::new(deps.tasks.clone());
        Self {
            deps,
            options: QueueOptions {
                subtask_timeout: config.subtask_timeout,
                metrics,
            },
            progress,
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            active: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the collaborators operations run against.
    #[must_use]
    pub const fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    /// Admits and dispatches an operation, returning its task id.
    ///
    /// Nothing is persisted for a rejected request. Once this returns, the
    /// outcome is only observable through [`Self::get_status`].
    ///
    /// # Errors
    ///
    /// Returns the admission rejection, or a storage error.
    #[tracing::instrument(skip(self, params), fields(tenant_id = %tenant_id))]
    pub async fn submit(&self, tenant_id: TenantId, params: TaskParams) -> Result<TaskId> {
        let task_type = params.task_type()?;
        let admission = admit(&tenant_id, &params, &self.deps).await?;
        let details = params.to_details()?;
        let operation = params.into_operation()?;

        let task = TaskInfo::top_level(task_type, details);
        let task_id = task.id;
        self.deps.tasks.insert(&task).await?;
        if let Some(mut backup) = admission.backup {
            backup.task_id = Some(task_id);
            if let Err(err) = self.deps.backups.insert(backup).await {
                self.fail_unstarted(task_id, &err).await;
                return Err(err);
            }
        }
        self.deps
            .ledger
            .append(TaskLedgerEntry::new(
                tenant_id,
                task_id,
                admission.target_type,
                admission.target_id,
                admission.kind,
                admission.description,
            ))
            .await?;

        let span = tracing::info_span!("lifecycle_task", %task_id, task_type = %task_type);
        let job = self.dispatch(operation, task_id, tenant_id).instrument(span);
        let handle = tokio::spawn(job);
        {
            let mut handles = self.handles.lock().map_err(poison_err)?;
            handles.retain(|_, h| !h.is_finished());
            handles.insert(task_id, handle);
        }

        tracing::info!(%task_id, %task_type, "task submitted");
        Ok(task_id)
    }

    async fn fail_unstarted(&self, task_id: TaskId, cause: &Error) {
        let message = Some(format!("not started: {cause}"));
        match self
            .deps
            .tasks
            .cas_state(&task_id, TaskState::Created, TaskState::Failure, message)
            .await
        {
            Ok(CasResult::Success) => {}
            Ok(other) => tracing::warn!(%task_id, ?other, "unstarted task not marked failed"),
            Err(e) => tracing::error!(%task_id, error = %e, "failed to mark unstarted task failed"),
        }
    }

    fn dispatch(
        &self,
        operation: Box<dyn LifecycleOperation>,
        task_id: TaskId,
        tenant_id: TenantId,
    ) -> impl Future<Output = ()> + Send + 'static {
        let deps = self.deps.clone();
        let options = self.options.clone();
        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!("worker pool closed, task not started");
                return;
            };
            options
                .metrics
                .set_active_operations(active.fetch_add(1, Ordering::AcqRel) + 1);

            if let Err(e) =
                run_lifecycle(operation.as_ref(), task_id, tenant_id, &deps, &options).await
            {
                tracing::warn!(error = %e, "lifecycle operation failed");
            }

            options
                .metrics
                .set_active_operations(active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1));
        }
    }

    /// Returns the progress of a task.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if no such task exists, or a storage error.
    pub async fn get_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        self.progress.get_status(task_id).await
    }

    /// Returns the parameters a task was submitted with.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if no such task exists, or a serialization
    /// error if the stored snapshot cannot be decoded.
    pub async fn get_details(&self, task_id: &TaskId) -> Result<TaskParams> {
        let task = self
            .deps
            .tasks
            .get(task_id)
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })?;
        TaskParams::from_details(&task.details)
    }

    /// Returns a tenant's task's failed subtasks, latest position first.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if the tenant has no such task.
    pub async fn failed_subtasks(
        &self,
        tenant_id: &TenantId,
        task_id: &TaskId,
    ) -> Result<Vec<TaskInfo>> {
        self.tenant_entry(tenant_id, task_id).await?;
        self.deps.tasks.failed_subtasks(task_id).await
    }

    /// Lists a tenant's tasks grouped by target id, newest first.
    ///
    /// Tasks whose progress cannot be read are logged and left out.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the ledger cannot be read.
    pub async fn list_tasks(
        &self,
        tenant_id: &TenantId,
        target_id: Option<Uuid>,
    ) -> Result<BTreeMap<Uuid, Vec<TaskSummary>>> {
        let mut grouped: BTreeMap<Uuid, Vec<TaskSummary>> = BTreeMap::new();
        for entry in self.deps.ledger.list(tenant_id, target_id).await? {
            match self.progress.get_status(&entry.task_id).await {
                Ok(status) => {
                    let summary = TaskSummary {
                        title: entry.friendly_title(),
                        entry,
                        status,
                    };
                    grouped
                        .entry(summary.entry.target_id)
                        .or_default()
                        .push(summary);
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %entry.task_id,
                        error = %e,
                        "skipping task without progress"
                    );
                }
            }
        }
        Ok(grouped)
    }

    /// Resubmits a failed task from its parameter snapshot.
    ///
    /// A node action is retried against the cluster's current version; a
    /// backup or restore gets a fresh backup record.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if the tenant has no such task,
    /// `RetryNotAllowed` unless the task failed, or any admission rejection.
    #[tracing::instrument(skip(self), fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub async fn retry(&self, tenant_id: TenantId, task_id: &TaskId) -> Result<TaskId> {
        self.tenant_entry(&tenant_id, task_id).await?;
        let task = self
            .deps
            .tasks
            .get(task_id)
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })?;
        if task.state != TaskState::Failure {
            return Err(Error::RetryNotAllowed {
                task_id: *task_id,
                reason: format!("task is {}", task.state),
            });
        }

        let mut params = TaskParams::from_details(&task.details)?;
        match &mut params {
            TaskParams::NodeAction(p) => {
                let cluster = self.deps.registry.get_or_fail(&p.cluster_id).await?;
                p.expected_version = Some(cluster.version);
            }
            TaskParams::CreateBackup(p) | TaskParams::RestoreBackup(p) => {
                p.backup_id = BackupId::generate();
            }
            TaskParams::DestroyUniverse(_) | TaskParams::DeleteBackup(_) => {}
        }

        let retried = self.submit(tenant_id, params).await?;
        tracing::info!(retried_task_id = %retried, "task resubmitted");
        Ok(retried)
    }

    /// Submits a delete for each of a tenant's completed backups.
    ///
    /// Unknown, foreign or incomplete backups are logged and skipped, as are
    /// backups whose submission is rejected.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backup store cannot be read.
    pub async fn delete_backups(
        &self,
        tenant_id: TenantId,
        backup_ids: &[BackupId],
    ) -> Result<Vec<TaskId>> {
        let mut submitted = Vec::with_capacity(backup_ids.len());
        for backup_id in backup_ids {
            let Some(backup) = self
                .deps
                .backups
                .get(backup_id)
                .await?
                .filter(|b| b.tenant_id == tenant_id)
            else {
                tracing::warn!(%backup_id, "backup not found, skipping delete");
                continue;
            };
            if backup.state != BackupState::Completed {
                tracing::warn!(
                    %backup_id,
                    state = %backup.state,
                    "backup not completed, skipping delete"
                );
                continue;
            }
            let params = TaskParams::DeleteBackup(DeleteBackupParams::for_backup(&backup));
            match self.submit(tenant_id, params).await {
                Ok(task_id) => submitted.push(task_id),
                Err(e) => tracing::warn!(%backup_id, error = %e, "backup delete rejected"),
            }
        }
        Ok(submitted)
    }

    /// Waits for a task submitted by this commissioner to finish, then
    /// returns its status.
    ///
    /// A task this instance did not spawn, or one already awaited, returns
    /// its current status immediately.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if no such task exists, or `Internal` if the
    /// worker panicked.
    pub async fn wait(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let handle = self.handles.lock().map_err(poison_err)?.remove(task_id);
        if let Some(handle) = handle {
            handle.await.map_err(|e| Error::Internal {
                message: format!("worker for task {task_id} failed: {e}"),
            })?;
        }
        self.get_status(task_id).await
    }

    async fn tenant_entry(
        &self,
        tenant_id: &TenantId,
        task_id: &TaskId,
    ) -> Result<TaskLedgerEntry> {
        self.deps
            .ledger
            .get(tenant_id, task_id)
            .await?
            .ok_or(Error::TaskNotFound { task_id: *task_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use unimgr_core::ClusterId;

    use crate::backup::{Backup, BackupStore, InMemoryBackupStore, TableRef};
    use crate::cluster::{CloudType, NodeActionType, NodeState};
    use crate::lifecycle::testing::{Fixture, cluster, fixture, node};
    use crate::lifecycle::{BackupParams, DestroyParams, NodeActionParams};
    use crate::registry::ClusterRegistry;
    use crate::store::TaskStore;

    /// Backup store whose writes always fail.
    #[derive(Default)]
    struct ReadOnlyBackups {
        inner: InMemoryBackupStore,
    }

    #[async_trait]
    impl BackupStore for ReadOnlyBackups {
        async fn insert(&self, _backup: Backup) -> Result<()> {
            Err(Error::storage("backup table is read-only"))
        }

        async fn get(&self, id: &BackupId) -> Result<Option<Backup>> {
            self.inner.get(id).await
        }

        async fn list_for_cluster(
            &self,
            tenant_id: &TenantId,
            cluster_id: &ClusterId,
        ) -> Result<Vec<Backup>> {
            self.inner.list_for_cluster(tenant_id, cluster_id).await
        }

        async fn set_state(&self, id: &BackupId, state: BackupState) -> Result<()> {
            self.inner.set_state(id, state).await
        }
    }

    fn backup_params(cluster_id: ClusterId) -> BackupParams {
        BackupParams {
            cluster_id,
            backup_id: BackupId::generate(),
            storage_config_id: Uuid::new_v4(),
            storage_location: "s3://bucket/orders".into(),
            tables: vec![TableRef::keyspace("ks")],
            parallelism: None,
        }
    }

    async fn seeded() -> Result<(Fixture, Commissioner, crate::cluster::Cluster)> {
        let f = fixture();
        let c = cluster(
            CloudType::Aws,
            vec![
                node("n1", true, NodeState::Live),
                node("n2", true, NodeState::Live),
                node("n3", false, NodeState::Live),
            ],
        );
        f.registry.insert(c.clone()).await?;
        let commissioner = Commissioner::new(f.deps.clone(), &OrchestratorConfig::default());
        Ok((f, commissioner, c))
    }

    #[tokio::test]
    async fn destroy_runs_to_success() -> Result<()> {
        let (f, commissioner, c) = seeded().await?;
        let params = TaskParams::DestroyUniverse(DestroyParams {
            cluster_id: c.id,
            force: false,
        });

        let task_id = commissioner.submit(c.tenant_id, params.clone()).await?;
        let status = commissioner.wait(&task_id).await?;
        assert_eq!(status.state, TaskState::Success);
        assert_eq!(status.percent, 100);
        assert!(f.registry.get(&c.id).await?.is_none());
        assert_eq!(commissioner.get_details(&task_id).await?, params);

        let listed = commissioner.list_tasks(&c.tenant_id, None).await?;
        let summaries = &listed[&c.id.as_uuid()];
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].entry.completed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn backup_record_is_written_with_its_task() -> Result<()> {
        let (f, commissioner, c) = seeded().await?;
        let params = backup_params(c.id);
        let backup_id = params.backup_id;

        let task_id = commissioner
            .submit(c.tenant_id, TaskParams::CreateBackup(params))
            .await?;
        let record = f.backups.get(&backup_id).await?;
        assert_eq!(record.and_then(|b| b.task_id), Some(task_id));
        Ok(())
    }

    #[tokio::test]
    async fn failed_backup_write_fails_the_task_and_writes_no_ledger_entry() -> Result<()> {
        let (f, _, c) = seeded().await?;
        let mut deps = f.deps.clone();
        deps.backups = Arc::new(ReadOnlyBackups::default());
        let commissioner = Commissioner::new(deps, &OrchestratorConfig::default());

        let err = commissioner
            .submit(c.tenant_id, TaskParams::CreateBackup(backup_params(c.id)))
            .await;
        assert!(matches!(err, Err(Error::Storage { .. })));
        assert_eq!(f.tasks.task_count()?, 1);
        assert_eq!(f.tasks.count_in_state(TaskState::Failure)?, 1);
        assert!(commissioner.list_tasks(&c.tenant_id, None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_submission_persists_nothing() -> Result<()> {
        let (f, commissioner, c) = seeded().await?;
        let params = TaskParams::NodeAction(NodeActionParams {
            cluster_id: c.id,
            node_name: "n1".into(),
            action: NodeActionType::Remove,
            expected_version: None,
        });

        let err = commissioner.submit(c.tenant_id, params).await;
        assert!(matches!(err, Err(Error::QuorumViolation { .. })));
        assert_eq!(f.tasks.task_count()?, 0);
        assert!(commissioner.list_tasks(&c.tenant_id, None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn only_failed_tasks_can_be_retried() -> Result<()> {
        let (f, commissioner, c) = seeded().await?;
        let params = TaskParams::NodeAction(NodeActionParams {
            cluster_id: c.id,
            node_name: "n3".into(),
            action: NodeActionType::Stop,
            expected_version: Some(1),
        });

        // A stale version fails the operation at lock time.
        let task_id = commissioner.submit(c.tenant_id, params).await?;
        let status = commissioner.wait(&task_id).await?;
        assert_eq!(status.state, TaskState::Failure);

        let retried = commissioner.retry(c.tenant_id, &task_id).await?;
        assert_eq!(commissioner.wait(&retried).await?.state, TaskState::Success);
        let TaskParams::NodeAction(p) = commissioner.get_details(&retried).await? else {
            panic!("retry changed the operation");
        };
        assert_eq!(p.expected_version, Some(c.version));

        let again = commissioner.retry(c.tenant_id, &retried).await;
        assert!(matches!(again, Err(Error::RetryNotAllowed { .. })));
        assert_eq!(
            f.registry
                .get(&c.id)
                .await?
                .and_then(|c| c.node("n3").map(|n| n.state)),
            Some(NodeState::Stopped)
        );
        Ok(())
    }

    #[tokio::test]
    async fn other_tenants_cannot_see_or_retry_tasks() -> Result<()> {
        let (f, commissioner, c) = seeded().await?;
        let params = TaskParams::DestroyUniverse(DestroyParams {
            cluster_id: c.id,
            force: false,
        });
        let task_id = commissioner.submit(c.tenant_id, params).await?;
        commissioner.wait(&task_id).await?;

        let stranger = TenantId::generate();
        assert!(matches!(
            commissioner.failed_subtasks(&stranger, &task_id).await,
            Err(Error::TaskNotFound { .. })
        ));
        assert!(matches!(
            commissioner.retry(stranger, &task_id).await,
            Err(Error::TaskNotFound { .. })
        ));
        assert!(f.tasks.get(&task_id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn delete_backups_skips_unknown_ids() -> Result<()> {
        let (_f, commissioner, c) = seeded().await?;
        let submitted = commissioner
            .delete_backups(c.tenant_id, &[BackupId::generate()])
            .await?;
        assert!(submitted.is_empty());
        Ok(())
    }
}
