//! Backup records and the executor that moves table data.
//!
//! A backup record is written when a create or restore request is admitted,
//! and its state is driven by the lifecycle operation that runs it.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use unimgr_core::{BackupId, ClusterId, TaskId, TenantId};

use crate::error::{Error, Result};

/// Whether a record tracks a backup or a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupAction {
    /// Copy tables out to storage.
    Create,
    /// Copy tables from storage into a cluster.
    Restore,
}

/// Backup record state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BackupState {
    /// The operation is running.
    InProgress,
    /// The operation finished successfully.
    Completed,
    /// The operation failed.
    Failed,
    /// Stored artifacts were deleted.
    Deleted,
}

impl BackupState {
    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::InProgress => matches!(target, Self::Completed | Self::Failed),
            Self::Completed => matches!(target, Self::Deleted),
            Self::Failed | Self::Deleted => false,
        }
    }
}

impl std::fmt::Display for BackupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

/// A keyspace, or one table inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    /// Keyspace name.
    pub keyspace: String,
    /// Table name; `None` means the whole keyspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

impl TableRef {
    /// References a whole keyspace.
    #[must_use]
    pub fn keyspace(keyspace: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: None,
        }
    }

    /// References one table.
    #[must_use]
    pub fn table(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: Some(table.into()),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{table}", self.keyspace),
            None => f.write_str(&self.keyspace),
        }
    }
}

/// A backup or restore record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// Backup identifier.
    pub id: BackupId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Source or destination cluster.
    pub cluster_id: ClusterId,
    /// Backup or restore.
    pub action: BackupAction,
    /// Current state.
    pub state: BackupState,
    /// Storage configuration used for the artifacts.
    pub storage_config_id: Uuid,
    /// Artifact location within the storage configuration.
    pub storage_location: String,
    /// Tables covered.
    pub tables: Vec<TableRef>,
    /// The task running the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Backup {
    /// Creates a record in `InProgress` state.
    #[must_use]
    pub fn new(
        id: BackupId,
        tenant_id: TenantId,
        cluster_id: ClusterId,
        action: BackupAction,
        storage_config_id: Uuid,
        storage_location: impl Into<String>,
        tables: Vec<TableRef>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id,
            cluster_id,
            action,
            state: BackupState::InProgress,
            storage_config_id,
            storage_location: storage_location.into(),
            tables,
            task_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage for backup records.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, backup: Backup) -> Result<()>;

    /// Gets a record by ID.
    async fn get(&self, id: &BackupId) -> Result<Option<Backup>>;

    /// Lists a tenant's records for a cluster, newest first.
    async fn list_for_cluster(&self, tenant_id: &TenantId, cluster_id: &ClusterId)
    -> Result<Vec<Backup>>;

    /// Moves a record to a new state.
    ///
    /// # Errors
    ///
    /// Returns `BackupNotFound`, or `InvalidStateTransition` if the state
    /// machine forbids the move.
    async fn set_state(&self, id: &BackupId, state: BackupState) -> Result<()>;
}

/// Moves table data to and from backup storage.
#[async_trait]
pub trait BackupExecutor: Send + Sync {
    /// Copies one table of `backup`'s cluster to storage.
    async fn backup_table(&self, backup: &Backup, table: &TableRef) -> Result<()>;

    /// Restores one table from storage into `backup`'s cluster.
    async fn restore_table(&self, backup: &Backup, table: &TableRef) -> Result<()>;

    /// Deletes every stored artifact of `backup`.
    async fn delete_artifacts(&self, backup: &Backup) -> Result<()>;
}

/// In-memory backup store.
#[derive(Debug, Default)]
pub struct InMemoryBackupStore {
    backups: RwLock<HashMap<BackupId, Backup>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryBackupStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, id: &BackupId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Backup) -> Result<()>,
    {
        let mut backups = self.backups.write().map_err(poison_err)?;
        let backup = backups
            .get_mut(id)
            .ok_or(Error::BackupNotFound { backup_id: *id })?;
        apply(backup)?;
        backup.updated_at = Utc::now();
        drop(backups);
        Ok(())
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn insert(&self, backup: Backup) -> Result<()> {
        let mut backups = self.backups.write().map_err(poison_err)?;
        if backups.contains_key(&backup.id) {
            drop(backups);
            return Err(Error::storage(format!("backup {} already exists", backup.id)));
        }
        backups.insert(backup.id, backup);
        drop(backups);
        Ok(())
    }

    async fn get(&self, id: &BackupId) -> Result<Option<Backup>> {
        let result = {
            let backups = self.backups.read().map_err(poison_err)?;
            backups.get(id).cloned()
        };
        Ok(result)
    }

    async fn list_for_cluster(
        &self,
        tenant_id: &TenantId,
        cluster_id: &ClusterId,
    ) -> Result<Vec<Backup>> {
        let mut result: Vec<Backup> = {
            let backups = self.backups.read().map_err(poison_err)?;
            backups
                .values()
                .filter(|b| b.tenant_id == *tenant_id && b.cluster_id == *cluster_id)
                .cloned()
                .collect()
        };
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    #[tracing::instrument(skip(self), fields(backup_id = %id, to = %state))]
    async fn set_state(&self, id: &BackupId, state: BackupState) -> Result<()> {
        self.update(id, |backup| {
            if !backup.state.can_transition_to(state) {
                return Err(Error::InvalidStateTransition {
                    from: backup.state.to_string(),
                    to: state.to_string(),
                    reason: format!("backup {id}"),
                });
            }
            backup.state = state;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup(tenant: TenantId, cluster: ClusterId) -> Backup {
        Backup::new(
            BackupId::generate(),
            tenant,
            cluster,
            BackupAction::Create,
            Uuid::new_v4(),
            "s3://bucket/orders",
            vec![TableRef::table("ks", "orders")],
        )
    }

    #[tokio::test]
    async fn state_machine_is_enforced() -> Result<()> {
        let store = InMemoryBackupStore::new();
        let b = backup(TenantId::generate(), ClusterId::generate());
        store.insert(b.clone()).await?;

        let err = store.set_state(&b.id, BackupState::Deleted).await;
        assert!(matches!(err, Err(Error::InvalidStateTransition { .. })));

        store.set_state(&b.id, BackupState::Completed).await?;
        store.set_state(&b.id, BackupState::Deleted).await?;
        let stored = store.get(&b.id).await?.map(|b| b.state);
        assert_eq!(stored, Some(BackupState::Deleted));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_backup_is_not_found() {
        let store = InMemoryBackupStore::new();
        let err = store
            .set_state(&BackupId::generate(), BackupState::Failed)
            .await;
        assert!(matches!(err, Err(Error::BackupNotFound { .. })));
    }

    #[tokio::test]
    async fn list_is_scoped_to_tenant_and_cluster() -> Result<()> {
        let store = InMemoryBackupStore::new();
        let tenant = TenantId::generate();
        let cluster = ClusterId::generate();
        store.insert(backup(tenant, cluster)).await?;
        store.insert(backup(tenant, ClusterId::generate())).await?;
        store.insert(backup(TenantId::generate(), cluster)).await?;

        assert_eq!(store.list_for_cluster(&tenant, &cluster).await?.len(), 1);
        Ok(())
    }

    #[test]
    fn table_ref_display() {
        assert_eq!(TableRef::table("ks", "t").to_string(), "ks.t");
        assert_eq!(TableRef::keyspace("ks").to_string(), "ks");
    }
}
