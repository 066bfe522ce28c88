//! Infrastructure fakes with call recording and failure injection.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use unimgr_core::{BackupId, ClusterId, TenantId};
use unimgr_flow::backup::{Backup, BackupExecutor, TableRef};
use unimgr_flow::cluster::{Node, UserIntent};
use unimgr_flow::error::{Error, Result};
use unimgr_flow::services::{
    AlertManager, DnsCommand, DnsManager, MonitoringTargets, NodeCommand, NodeManager,
};

/// Record of a collaborator call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOp {
    /// Node command.
    Node {
        /// Cluster the node belongs to.
        cluster_id: ClusterId,
        /// Node name.
        node: String,
        /// Command issued.
        command: NodeCommand,
    },
    /// DNS change.
    Dns {
        /// Cluster whose entry changed.
        cluster_id: ClusterId,
        /// Change applied.
        command: DnsCommand,
    },
    /// Monitoring target removal.
    RemoveTargets {
        /// Cluster whose targets were removed.
        cluster_id: ClusterId,
    },
    /// Alert resolution.
    ResolveAlerts {
        /// Owning tenant.
        tenant_id: TenantId,
        /// Cluster whose alerts were resolved.
        cluster_id: ClusterId,
    },
    /// Table backup.
    BackupTable {
        /// Backup record.
        backup_id: BackupId,
        /// Table copied.
        table: String,
    },
    /// Table restore.
    RestoreTable {
        /// Backup record.
        backup_id: BackupId,
        /// Table restored.
        table: String,
    },
    /// Artifact deletion.
    DeleteArtifacts {
        /// Backup record.
        backup_id: BackupId,
    },
}

/// A call that should fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Commands on a node; `None` fails every command.
    Node {
        /// Node name.
        name: String,
        /// Command to fail.
        command: Option<NodeCommand>,
    },
    /// Every DNS change.
    Dns,
    /// Monitoring target removal.
    Monitoring,
    /// Backup or restore of one table, by `keyspace.table` name.
    Table(String),
    /// Artifact deletion.
    Artifacts,
}

/// Node, DNS, monitoring, alert and backup fakes sharing one call log.
///
/// Records every call, including the ones it fails.
#[derive(Debug, Default)]
pub struct RecordingServices {
    operations: Mutex<Vec<ServiceOp>>,
    faults: Mutex<Vec<Fault>>,
    latency: Option<Duration>,
}

impl RecordingServices {
    /// Creates fakes that accept every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates fakes that sleep before answering each call.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded calls in order.
    #[must_use]
    pub fn operations(&self) -> Vec<ServiceOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns `(node, command)` for every recorded node command.
    #[must_use]
    pub fn node_commands(&self) -> Vec<(String, NodeCommand)> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                ServiceOp::Node { node, command, .. } => Some((node, command)),
                _ => None,
            })
            .collect()
    }

    /// Clears recorded calls.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Injects a failure.
    pub fn inject_failure(&self, fault: Fault) {
        self.faults.lock().expect("lock").push(fault);
    }

    /// Fails every command on the named node.
    pub fn fail_node(&self, name: impl Into<String>) {
        self.inject_failure(Fault::Node {
            name: name.into(),
            command: None,
        });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.faults.lock().expect("lock").clear();
    }

    async fn record(&self, op: ServiceOp) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.operations.lock().expect("lock").push(op);
    }

    fn faulted(&self, matches: impl Fn(&Fault) -> bool) -> bool {
        self.faults.lock().expect("lock").iter().any(matches)
    }
}

#[async_trait]
impl NodeManager for RecordingServices {
    async fn run(&self, cluster_id: &ClusterId, node: &Node, command: NodeCommand) -> Result<()> {
        self.record(ServiceOp::Node {
            cluster_id: *cluster_id,
            node: node.name.clone(),
            command,
        })
        .await;
        let failed = self.faulted(|f| match f {
            Fault::Node { name, command: c } => {
                *name == node.name && c.is_none_or(|c| c == command)
            }
            _ => false,
        });
        if failed {
            return Err(Error::collaborator(
                "node-manager",
                format!("{command} failed on {}", node.name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsManager for RecordingServices {
    async fn manipulate(
        &self,
        cluster_id: &ClusterId,
        command: DnsCommand,
        _intent: &UserIntent,
    ) -> Result<()> {
        self.record(ServiceOp::Dns {
            cluster_id: *cluster_id,
            command,
        })
        .await;
        if self.faulted(|f| *f == Fault::Dns) {
            return Err(Error::collaborator("dns", "dns provider unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitoringTargets for RecordingServices {
    async fn remove_targets(&self, cluster_id: &ClusterId) -> Result<()> {
        self.record(ServiceOp::RemoveTargets {
            cluster_id: *cluster_id,
        })
        .await;
        if self.faulted(|f| *f == Fault::Monitoring) {
            return Err(Error::collaborator("monitoring", "target file locked"));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertManager for RecordingServices {
    async fn resolve_alerts(&self, tenant_id: &TenantId, cluster_id: &ClusterId) -> Result<()> {
        self.record(ServiceOp::ResolveAlerts {
            tenant_id: *tenant_id,
            cluster_id: *cluster_id,
        })
        .await;
        Ok(())
    }
}

#[async_trait]
impl BackupExecutor for RecordingServices {
    async fn backup_table(&self, backup: &Backup, table: &TableRef) -> Result<()> {
        let name = table.to_string();
        self.record(ServiceOp::BackupTable {
            backup_id: backup.id,
            table: name.clone(),
        })
        .await;
        self.table_result(name)
    }

    async fn restore_table(&self, backup: &Backup, table: &TableRef) -> Result<()> {
        let name = table.to_string();
        self.record(ServiceOp::RestoreTable {
            backup_id: backup.id,
            table: name.clone(),
        })
        .await;
        self.table_result(name)
    }

    async fn delete_artifacts(&self, backup: &Backup) -> Result<()> {
        self.record(ServiceOp::DeleteArtifacts {
            backup_id: backup.id,
        })
        .await;
        if self.faulted(|f| *f == Fault::Artifacts) {
            return Err(Error::collaborator("backup", "artifact store unavailable"));
        }
        Ok(())
    }
}

impl RecordingServices {
    fn table_result(&self, name: String) -> Result<()> {
        if self.faulted(|f| *f == Fault::Table(name.clone())) {
            return Err(Error::collaborator("backup", format!("copy of {name} failed")));
        }
        Ok(())
    }
}
