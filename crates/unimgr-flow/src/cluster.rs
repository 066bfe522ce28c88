//! Cluster resource model.
//!
//! A [`Cluster`] owns its node table by value; nodes are addressed by name and
//! never hold a pointer back to their cluster.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use unimgr_core::{CertificateId, ClusterId, TenantId};

use crate::ledger::CustomerTaskKind;
use crate::task::TaskType;

/// Infrastructure provider of a cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudType {
    /// Amazon Web Services.
    Aws,
    /// Google Cloud Platform.
    Gcp,
    /// Microsoft Azure.
    Azure,
    /// Kubernetes.
    Kubernetes,
    /// Customer-managed machines.
    #[default]
    #[serde(rename = "onprem")]
    OnPrem,
}

/// Lifecycle state of a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NodeState {
    /// Declared but not yet provisioned.
    #[default]
    ToBeAdded,
    /// Instance exists, software configured.
    Provisioned,
    /// Processes running and serving.
    Live,
    /// Processes are being stopped.
    Stopping,
    /// Processes stopped; instance retained.
    Stopped,
    /// Processes are being started.
    Starting,
    /// Node is being removed from the cluster.
    Removing,
    /// Node no longer serves the cluster; instance retained.
    Removed,
    /// Instance released back to the provider pool.
    Decommissioned,
    /// Instance destroyed.
    Destroyed,
}

impl NodeState {
    /// Returns true if the node still participates in the cluster topology.
    #[must_use]
    pub const fn is_in_topology(&self) -> bool {
        !matches!(self, Self::Removed | Self::Decommissioned | Self::Destroyed)
    }
}

/// A single machine belonging to exactly one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Node name, unique within its cluster.
    pub name: String,
    /// Private IP or hostname.
    pub private_ip: String,
    /// Port of the master RPC endpoint.
    pub master_rpc_port: u16,
    /// Runs a master process.
    pub is_master: bool,
    /// Runs a tablet server process.
    pub is_tserver: bool,
    /// Lifecycle state.
    pub state: NodeState,
}

impl Node {
    /// Returns the node's master RPC address as `host:port`.
    #[must_use]
    pub fn master_address(&self) -> String {
        format!("{}:{}", self.private_ip, self.master_rpc_port)
    }
}

/// User-declared shape of one cluster section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIntent {
    /// Infrastructure provider.
    pub provider_type: CloudType,
    /// Replication factor; also the master quorum size.
    pub replication_factor: u32,
    /// Requested node count.
    pub num_nodes: u32,
    /// Whether nodes talk to each other over TLS.
    #[serde(default)]
    pub enable_node_to_node_encrypt: bool,
}

/// The primary cluster or one read replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Section identifier.
    pub uuid: Uuid,
    /// Declared shape.
    pub user_intent: UserIntent,
}

/// Topology metadata and security settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    /// Primary section.
    pub primary: ClusterSpec,
    /// Read replica sections.
    #[serde(default)]
    pub read_replicas: Vec<ClusterSpec>,
    /// Root certificate used for node TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_ca: Option<CertificateId>,
    /// Inter-node TLS is enabled.
    #[serde(default)]
    pub node_to_node_encryption: bool,
    /// Registered from an existing deployment rather than created here.
    #[serde(default)]
    pub imported: bool,
    /// Node actions are permitted.
    pub editable: bool,
}

/// A managed database deployment ("universe").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster identifier.
    pub id: ClusterId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Display name.
    pub name: String,
    /// Incremented on every lock release.
    pub version: u64,
    /// Exclusive lock flag.
    pub update_in_progress: bool,
    /// Node table.
    pub nodes: Vec<Node>,
    /// Topology metadata.
    pub details: ClusterDetails,
}

impl Cluster {
    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Looks up a node by name for mutation.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    /// Returns the replication factor of the primary section.
    #[must_use]
    pub const fn replication_factor(&self) -> u32 {
        self.details.primary.user_intent.replication_factor
    }

    /// Returns the provider of the primary section.
    #[must_use]
    pub const fn provider(&self) -> CloudType {
        self.details.primary.user_intent.provider_type
    }

    /// Returns `host:port` for every master still in the topology.
    #[must_use]
    pub fn master_addresses(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.is_master && n.state.is_in_topology())
            .map(Node::master_address)
            .collect()
    }

    /// Returns the masters that are currently live.
    pub fn live_masters(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| n.is_master && n.state == NodeState::Live)
    }

    /// Returns the number of live masters other than `node_name`.
    #[must_use]
    pub fn live_masters_excluding(&self, node_name: &str) -> usize {
        self.live_masters().filter(|n| n.name != node_name).count()
    }

    /// Returns true if `action` on `node_name` keeps the master quorum intact.
    ///
    /// Only stopping or removing a master can break quorum; the action is
    /// allowed while the live masters left behind still cover the
    /// replication factor. Unknown nodes are not allowed.
    #[must_use]
    pub fn is_node_action_allowed(&self, node_name: &str, action: NodeActionType) -> bool {
        let Some(node) = self.node(node_name) else {
            return false;
        };
        if !matches!(action, NodeActionType::Stop | NodeActionType::Remove) || !node.is_master {
            return true;
        }
        let remaining = self.live_masters_excluding(node_name);
        u32::try_from(remaining).map_or(true, |n| n >= self.replication_factor())
    }
}

/// A node-level action requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeActionType {
    /// Add a node to the cluster.
    Add,
    /// Remove a node from the cluster.
    Remove,
    /// Stop a node's processes.
    Stop,
    /// Start a stopped node.
    Start,
    /// Start a master process on a node.
    StartMaster,
    /// Internal diagnostic action; never accepted from callers.
    Query,
}

impl NodeActionType {
    /// Returns the top-level task type for the action.
    ///
    /// `Query` has no task; it is not an executable action.
    #[must_use]
    pub const fn task_type(&self) -> Option<TaskType> {
        match self {
            Self::Add => Some(TaskType::AddNodeToUniverse),
            Self::Remove => Some(TaskType::RemoveNodeFromUniverse),
            Self::Stop => Some(TaskType::StopNodeInUniverse),
            Self::Start => Some(TaskType::StartNodeInUniverse),
            Self::StartMaster => Some(TaskType::StartMasterOnNode),
            Self::Query => None,
        }
    }

    /// Returns the ledger kind for the action.
    #[must_use]
    pub const fn customer_task_kind(&self) -> Option<CustomerTaskKind> {
        match self {
            Self::Add => Some(CustomerTaskKind::Add),
            Self::Remove => Some(CustomerTaskKind::Remove),
            Self::Stop => Some(CustomerTaskKind::Stop),
            Self::Start => Some(CustomerTaskKind::Start),
            Self::StartMaster => Some(CustomerTaskKind::StartMaster),
            Self::Query => None,
        }
    }
}

impl std::fmt::Display for NodeActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Remove => write!(f, "REMOVE"),
            Self::Stop => write!(f, "STOP"),
            Self::Start => write!(f, "START"),
            Self::StartMaster => write!(f, "START_MASTER"),
            Self::Query => write!(f, "QUERY"),
        }
    }
}
