//! Shared fixtures for lifecycle unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use unimgr_core::{ClusterId, TaskId, TenantId};

use super::{Dependencies, OperationScope};
use crate::backup::{Backup, BackupExecutor, InMemoryBackupStore, TableRef};
use crate::certificate::InMemoryCertificateDirectory;
use crate::cluster::{
    CloudType, Cluster, ClusterDetails, ClusterSpec, Node, NodeState, UserIntent,
};
use crate::error::Result;
use crate::kms::InMemoryKeyHistory;
use crate::ledger::memory::InMemoryTaskLedger;
use crate::registry::memory::InMemoryClusterRegistry;
use crate::services::{
    AlertManager, DnsCommand, DnsManager, MonitoringTargets, NodeCommand, NodeManager,
};
use crate::store::memory::InMemoryTaskStore;

/// Collaborator that accepts every call.
pub struct Quiet;

#[async_trait]
impl NodeManager for Quiet {
    async fn run(&self, _: &ClusterId, _: &Node, _: NodeCommand) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DnsManager for Quiet {
    async fn manipulate(&self, _: &ClusterId, _: DnsCommand, _: &UserIntent) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MonitoringTargets for Quiet {
    async fn remove_targets(&self, _: &ClusterId) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AlertManager for Quiet {
    async fn resolve_alerts(&self, _: &TenantId, _: &ClusterId) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BackupExecutor for Quiet {
    async fn backup_table(&self, _: &Backup, _: &TableRef) -> Result<()> {
        Ok(())
    }

    async fn restore_table(&self, _: &Backup, _: &TableRef) -> Result<()> {
        Ok(())
    }

    async fn delete_artifacts(&self, _: &Backup) -> Result<()> {
        Ok(())
    }
}

/// In-memory stores plus quiet collaborators.
pub struct Fixture {
    pub deps: Dependencies,
    pub registry: Arc<InMemoryClusterRegistry>,
    pub tasks: Arc<InMemoryTaskStore>,
    pub backups: Arc<InMemoryBackupStore>,
}

pub fn fixture() -> Fixture {
    let registry = Arc::new(InMemoryClusterRegistry::new());
    let tasks = Arc::new(InMemoryTaskStore::new());
    let backups = Arc::new(InMemoryBackupStore::new());
    let deps = Dependencies {
        registry: registry.clone(),
        tasks: tasks.clone(),
        ledger: Arc::new(InMemoryTaskLedger::new()),
        backups: backups.clone(),
        certificates: Arc::new(InMemoryCertificateDirectory::new()),
        key_history: Arc::new(InMemoryKeyHistory::new()),
        node_manager: Arc::new(Quiet),
        dns: Arc::new(Quiet),
        monitoring: Arc::new(Quiet),
        alerts: Arc::new(Quiet),
        backup_executor: Arc::new(Quiet),
    };
    Fixture {
        deps,
        registry,
        tasks,
        backups,
    }
}

pub fn node(name: &str, is_master: bool, state: NodeState) -> Node {
    Node {
        name: name.into(),
        private_ip: format!("10.0.0.{}", name.len()),
        master_rpc_port: 7100,
        is_master,
        is_tserver: true,
        state,
    }
}

pub fn cluster(provider: CloudType, nodes: Vec<Node>) -> Cluster {
    Cluster {
        id: ClusterId::generate(),
        tenant_id: TenantId::generate(),
        name: "orders".into(),
        version: 5,
        update_in_progress: false,
        nodes,
        details: ClusterDetails {
            primary: ClusterSpec {
                uuid: Uuid::new_v4(),
                user_intent: UserIntent {
                    provider_type: provider,
                    replication_factor: 1,
                    num_nodes: 3,
                    enable_node_to_node_encrypt: false,
                },
            },
            read_replicas: vec![],
            root_ca: None,
            node_to_node_encryption: false,
            imported: false,
            editable: true,
        },
    }
}

/// A scope holding `cluster` as its locked snapshot.
pub fn scope_for(cluster: Cluster) -> OperationScope {
    let mut scope = OperationScope::new(TaskId::generate(), cluster.tenant_id, cluster.id);
    scope.cluster = Some(cluster);
    scope
}
