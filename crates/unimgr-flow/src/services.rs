//! Infrastructure collaborators used by lifecycle subtasks.
//!
//! Each trait is the boundary to a subsystem the orchestrator does not own:
//! node provisioning and process control, DNS, monitoring scrape targets and
//! alerting. Implementations are expected to bound their own RPC time; the
//! queue additionally enforces the subtask timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use unimgr_core::{ClusterId, TenantId};

use crate::cluster::{Node, UserIntent};
use crate::error::Result;

/// A database server process role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    /// Control process.
    Master,
    /// Data process.
    #[serde(rename = "tserver")]
    TServer,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::TServer => write!(f, "tserver"),
        }
    }
}

/// A command executed against one node's instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "command", content = "process", rename_all = "snake_case")]
pub enum NodeCommand {
    /// Create the instance and install software.
    Provision,
    /// Write server configuration.
    Configure,
    /// Start a server process.
    Start(ServerType),
    /// Stop a server process.
    Stop(ServerType),
    /// Destroy the instance.
    Destroy,
}

impl std::fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provision => write!(f, "provision"),
            Self::Configure => write!(f, "configure"),
            Self::Start(server) => write!(f, "start {server}"),
            Self::Stop(server) => write!(f, "stop {server}"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Provisioning and process control for cluster nodes.
#[async_trait]
pub trait NodeManager: Send + Sync {
    /// Runs `command` against `node` of `cluster_id`.
    async fn run(&self, cluster_id: &ClusterId, node: &Node, command: NodeCommand) -> Result<()>;
}

/// A DNS change for a cluster's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsCommand {
    /// Create the record.
    Create,
    /// Update the record.
    Edit,
    /// Delete the record.
    Delete,
}

/// DNS management for cluster endpoints.
#[async_trait]
pub trait DnsManager: Send + Sync {
    /// Applies a DNS change for the cluster.
    async fn manipulate(
        &self,
        cluster_id: &ClusterId,
        command: DnsCommand,
        intent: &UserIntent,
    ) -> Result<()>;
}

/// Monitoring scrape-target management.
#[async_trait]
pub trait MonitoringTargets: Send + Sync {
    /// Removes the cluster's scrape targets.
    async fn remove_targets(&self, cluster_id: &ClusterId) -> Result<()>;
}

/// Alert management.
#[async_trait]
pub trait AlertManager: Send + Sync {
    /// Resolves every open alert raised for the cluster.
    async fn resolve_alerts(&self, tenant_id: &TenantId, cluster_id: &ClusterId) -> Result<()>;
}
