//! Concrete subtasks used by lifecycle operations.
//!
//! Each subtask wraps exactly one collaborator call so its record in the
//! task store describes a single side effect.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use unimgr_core::{BackupId, ClusterId};

use crate::backup::{Backup, BackupExecutor, BackupState, BackupStore, TableRef};
use crate::cluster::{Node, NodeState, UserIntent};
use crate::error::Result;
use crate::kms::KeyHistory;
use crate::registry::ClusterRegistry;
use crate::services::{DnsCommand, DnsManager, MonitoringTargets, NodeCommand, NodeManager};
use crate::subtask::{Subtask, SubtaskContext};
use crate::task::TaskType;

/// Deletes a cluster's encryption key history.
pub struct DestroyEncryptionAtRest {
    /// Key history to clean.
    pub key_history: Arc<dyn KeyHistory>,
    /// Cluster whose history is deleted.
    pub cluster_id: ClusterId,
}

#[async_trait]
impl Subtask for DestroyEncryptionAtRest {
    fn task_type(&self) -> TaskType {
        TaskType::DestroyEncryptionAtRest
    }

    fn details(&self) -> serde_json::Value {
        json!({ "clusterId": self.cluster_id })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        let removed = self.key_history.delete_history(&self.cluster_id).await?;
        tracing::debug!(cluster_id = %self.cluster_id, removed, "deleted key history");
        Ok(())
    }
}

/// Applies a DNS change for a cluster.
pub struct DnsManipulation {
    /// DNS collaborator.
    pub dns: Arc<dyn DnsManager>,
    /// Target cluster.
    pub cluster_id: ClusterId,
    /// Change to apply.
    pub command: DnsCommand,
    /// Declared shape of the primary section.
    pub intent: UserIntent,
}

#[async_trait]
impl Subtask for DnsManipulation {
    fn task_type(&self) -> TaskType {
        TaskType::DnsManipulation
    }

    fn details(&self) -> serde_json::Value {
        json!({ "clusterId": self.cluster_id, "command": self.command })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        self.dns
            .manipulate(&self.cluster_id, self.command, &self.intent)
            .await
    }
}

/// Runs one command against one node.
pub struct NodeCommandSubtask {
    /// Node collaborator.
    pub node_manager: Arc<dyn NodeManager>,
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Target node.
    pub node: Node,
    /// Command to run.
    pub command: NodeCommand,
}

#[async_trait]
impl Subtask for NodeCommandSubtask {
    fn task_type(&self) -> TaskType {
        match self.command {
            NodeCommand::Provision => TaskType::ProvisionServer,
            NodeCommand::Configure => TaskType::ConfigureServer,
            NodeCommand::Start(_) | NodeCommand::Stop(_) => TaskType::ServerControl,
            NodeCommand::Destroy => TaskType::DestroyServer,
        }
    }

    fn details(&self) -> serde_json::Value {
        json!({
            "clusterId": self.cluster_id,
            "nodeName": self.node.name,
            "command": self.command.to_string(),
        })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        tracing::debug!(
            cluster_id = %self.cluster_id,
            node = %self.node.name,
            command = %self.command,
            "running node command"
        );
        self.node_manager
            .run(&self.cluster_id, &self.node, self.command)
            .await
    }
}

/// Records a node's lifecycle state in the registry.
pub struct SetNodeState {
    /// Registry to update.
    pub registry: Arc<dyn ClusterRegistry>,
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Target node.
    pub node_name: String,
    /// State to record.
    pub state: NodeState,
}

#[async_trait]
impl Subtask for SetNodeState {
    fn task_type(&self) -> TaskType {
        TaskType::SetNodeState
    }

    fn details(&self) -> serde_json::Value {
        json!({ "nodeName": self.node_name, "state": self.state })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        self.registry
            .update_node_state(&self.cluster_id, &self.node_name, self.state)
            .await
    }
}

/// Records whether a node runs a master process.
pub struct UpdateNodeProcess {
    /// Registry to update.
    pub registry: Arc<dyn ClusterRegistry>,
    /// Owning cluster.
    pub cluster_id: ClusterId,
    /// Target node.
    pub node_name: String,
    /// New master flag.
    pub is_master: bool,
}

#[async_trait]
impl Subtask for UpdateNodeProcess {
    fn task_type(&self) -> TaskType {
        TaskType::UpdateNodeProcess
    }

    fn details(&self) -> serde_json::Value {
        json!({ "nodeName": self.node_name, "isMaster": self.is_master })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        self.registry
            .set_node_master(&self.cluster_id, &self.node_name, self.is_master)
            .await
    }
}

/// Deletes the cluster's registry entry.
pub struct RemoveUniverseEntry {
    /// Registry to update.
    pub registry: Arc<dyn ClusterRegistry>,
    /// Cluster to delete.
    pub cluster_id: ClusterId,
}

#[async_trait]
impl Subtask for RemoveUniverseEntry {
    fn task_type(&self) -> TaskType {
        TaskType::RemoveUniverseEntry
    }

    fn details(&self) -> serde_json::Value {
        json!({ "clusterId": self.cluster_id })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        if !self.registry.remove(&self.cluster_id).await? {
            tracing::warn!(cluster_id = %self.cluster_id, "cluster entry already removed");
        }
        Ok(())
    }
}

/// Removes the cluster's monitoring scrape targets.
pub struct MonitoringTargetUpdate {
    /// Monitoring collaborator.
    pub monitoring: Arc<dyn MonitoringTargets>,
    /// Cluster whose targets are removed.
    pub cluster_id: ClusterId,
}

#[async_trait]
impl Subtask for MonitoringTargetUpdate {
    fn task_type(&self) -> TaskType {
        TaskType::MonitoringTargetUpdate
    }

    fn details(&self) -> serde_json::Value {
        json!({ "clusterId": self.cluster_id, "removeFile": true })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        self.monitoring.remove_targets(&self.cluster_id).await
    }
}

/// Direction of a table copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCopy {
    /// Cluster to storage.
    Backup,
    /// Storage to cluster.
    Restore,
}

/// Copies one table to or from backup storage.
pub struct TableCopySubtask {
    /// Backup executor.
    pub executor: Arc<dyn BackupExecutor>,
    /// Backup record the copy belongs to.
    pub backup: Backup,
    /// Table to copy.
    pub table: TableRef,
    /// Copy direction.
    pub direction: TableCopy,
}

#[async_trait]
impl Subtask for TableCopySubtask {
    fn task_type(&self) -> TaskType {
        match self.direction {
            TableCopy::Backup => TaskType::BackupTable,
            TableCopy::Restore => TaskType::RestoreTable,
        }
    }

    fn details(&self) -> serde_json::Value {
        json!({
            "backupId": self.backup.id,
            "table": self.table,
            "storageLocation": self.backup.storage_location,
        })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        match self.direction {
            TableCopy::Backup => self.executor.backup_table(&self.backup, &self.table).await,
            TableCopy::Restore => self.executor.restore_table(&self.backup, &self.table).await,
        }
    }
}

/// Deletes a backup's stored artifacts.
pub struct DeleteBackupArtifacts {
    /// Backup executor.
    pub executor: Arc<dyn BackupExecutor>,
    /// Backup to delete.
    pub backup: Backup,
}

#[async_trait]
impl Subtask for DeleteBackupArtifacts {
    fn task_type(&self) -> TaskType {
        TaskType::DeleteBackupArtifacts
    }

    fn details(&self) -> serde_json::Value {
        json!({
            "backupId": self.backup.id,
            "storageLocation": self.backup.storage_location,
        })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        self.executor.delete_artifacts(&self.backup).await
    }
}

/// Records a backup's state.
pub struct SetBackupState {
    /// Backup store.
    pub backups: Arc<dyn BackupStore>,
    /// Target backup.
    pub backup_id: BackupId,
    /// State to record.
    pub state: BackupState,
}

#[async_trait]
impl Subtask for SetBackupState {
    fn task_type(&self) -> TaskType {
        TaskType::SetBackupState
    }

    fn details(&self) -> serde_json::Value {
        json!({ "backupId": self.backup_id, "state": self.state })
    }

    async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
        self.backups.set_state(&self.backup_id, self.state).await
    }
}
