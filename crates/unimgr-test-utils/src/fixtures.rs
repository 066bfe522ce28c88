//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create test data with sensible defaults.

use std::sync::Arc;

use uuid::Uuid;

use unimgr_core::{CertificateId, ClusterId, KeyConfigId, TenantId};
use unimgr_flow::backup::InMemoryBackupStore;
use unimgr_flow::certificate::InMemoryCertificateDirectory;
use unimgr_flow::cluster::{
    CloudType, Cluster, ClusterDetails, ClusterSpec, Node, NodeState, UserIntent,
};
use unimgr_flow::commissioner::Commissioner;
use unimgr_flow::config::OrchestratorConfig;
use unimgr_flow::ha::StaticHaRole;
use unimgr_flow::kms::InMemoryKeyHistory;
use unimgr_flow::ledger::memory::InMemoryTaskLedger;
use unimgr_flow::lifecycle::Dependencies;
use unimgr_flow::metrics::OrchestratorMetrics;
use unimgr_flow::registry::ClusterRegistry;
use unimgr_flow::registry::memory::InMemoryClusterRegistry;
use unimgr_flow::rekey::{RekeyDependencies, RekeyScheduler};
use unimgr_flow::store::memory::InMemoryTaskStore;

use crate::keys::{ScriptedKeyManager, ScriptedNodeKeyClient, StaticTenantDirectory};
use crate::services::RecordingServices;

/// Test context with in-memory stores and scripted collaborators.
pub struct TestContext {
    /// Tenant used by default.
    pub tenant_id: TenantId,
    /// Cluster registry.
    pub registry: Arc<InMemoryClusterRegistry>,
    /// Task records.
    pub tasks: Arc<InMemoryTaskStore>,
    /// Customer task ledger.
    pub ledger: Arc<InMemoryTaskLedger>,
    /// Backup records.
    pub backups: Arc<InMemoryBackupStore>,
    /// Certificate records.
    pub certificates: Arc<InMemoryCertificateDirectory>,
    /// Key rotation history.
    pub key_history: Arc<InMemoryKeyHistory>,
    /// Node, DNS, monitoring, alert and backup fakes.
    pub services: Arc<RecordingServices>,
    /// Key resolution fake.
    pub key_manager: Arc<ScriptedKeyManager>,
    /// Key delivery fake.
    pub node_keys: Arc<ScriptedNodeKeyClient>,
    /// Tenant enumeration.
    pub tenants: Arc<StaticTenantDirectory>,
    /// HA role of this process.
    pub ha_role: Arc<StaticHaRole>,
}

impl TestContext {
    /// Creates a context with a fresh tenant and empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::with_collaborators(RecordingServices::new(), ScriptedNodeKeyClient::new())
    }

    /// Creates a context around specific infrastructure and key fakes.
    #[must_use]
    pub fn with_collaborators(
        services: RecordingServices,
        node_keys: ScriptedNodeKeyClient,
    ) -> Self {
        Self {
            tenant_id: TenantId::generate(),
            registry: Arc::new(InMemoryClusterRegistry::new()),
            tasks: Arc::new(InMemoryTaskStore::new()),
            ledger: Arc::new(InMemoryTaskLedger::new()),
            backups: Arc::new(InMemoryBackupStore::new()),
            certificates: Arc::new(InMemoryCertificateDirectory::new()),
            key_history: Arc::new(InMemoryKeyHistory::new()),
            services: Arc::new(services),
            key_manager: Arc::new(ScriptedKeyManager::new()),
            node_keys: Arc::new(node_keys),
            tenants: Arc::new(StaticTenantDirectory::new()),
            ha_role: Arc::new(StaticHaRole::active()),
        }
    }

    /// Returns lifecycle dependencies backed by this context.
    #[must_use]
    pub fn deps(&self) -> Dependencies {
        Dependencies {
            registry: self.registry.clone(),
            tasks: self.tasks.clone(),
            ledger: self.ledger.clone(),
            backups: self.backups.clone(),
            certificates: self.certificates.clone(),
            key_history: self.key_history.clone(),
            node_manager: self.services.clone(),
            dns: self.services.clone(),
            monitoring: self.services.clone(),
            alerts: self.services.clone(),
            backup_executor: self.services.clone(),
        }
    }

    /// Returns a commissioner with default configuration.
    #[must_use]
    pub fn commissioner(&self) -> Commissioner {
        Commissioner::new(self.deps(), &OrchestratorConfig::default())
    }

    /// Returns a rekey scheduler backed by this context.
    #[must_use]
    pub fn rekey_scheduler(&self) -> RekeyScheduler {
        let deps = RekeyDependencies {
            registry: self.registry.clone(),
            key_history: self.key_history.clone(),
            key_manager: self.key_manager.clone(),
            node_keys: self.node_keys.clone(),
            ha_role: self.ha_role.clone(),
            tenants: self.tenants.clone(),
        };
        RekeyScheduler::new(deps, OrchestratorMetrics::new())
    }

    /// Stores a cluster and registers it with the tenant directory.
    pub async fn insert_cluster(&self, cluster: Cluster) -> Cluster {
        self.tenants.add(cluster.tenant_id, cluster.id);
        self.registry
            .insert(cluster.clone())
            .await
            .expect("insert cluster");
        cluster
    }

    /// Records one key rotation for a cluster.
    pub fn rotate_key(&self, cluster_id: ClusterId) {
        self.key_history
            .rotate(cluster_id, KeyConfigId::generate(), b"universe-key-ref")
            .expect("rotate key");
    }

    /// Reads a cluster back from the registry.
    pub async fn cluster(&self, cluster_id: &ClusterId) -> Option<Cluster> {
        self.registry.get(cluster_id).await.expect("read cluster")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for creating test clusters.
pub struct ClusterFactory;

impl ClusterFactory {
    /// Starts a cluster builder for `tenant_id`.
    #[must_use]
    pub fn builder(tenant_id: TenantId) -> ClusterBuilder {
        ClusterBuilder::new(tenant_id)
    }

    /// A cloud cluster with three live masters and replication factor 3.
    #[must_use]
    pub fn three_masters(tenant_id: TenantId) -> Cluster {
        Self::builder(tenant_id).masters(3).replication_factor(3).build()
    }

    /// A cluster with three masters, two extra tablet servers and
    /// replication factor 1.
    #[must_use]
    pub fn five_nodes(tenant_id: TenantId, provider: CloudType) -> Cluster {
        Self::builder(tenant_id)
            .provider(provider)
            .masters(3)
            .tservers(2)
            .replication_factor(1)
            .build()
    }
}

/// Builder for [`Cluster`] records.
///
/// Nodes are named `node-1`, `node-2`, ...; masters come first. Every node
/// gets an address in a subnet derived from the cluster id.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    tenant_id: TenantId,
    name: String,
    provider: CloudType,
    masters: usize,
    tservers: usize,
    replication_factor: u32,
    version: u64,
    locked: bool,
    imported: bool,
    editable: bool,
    root_ca: Option<CertificateId>,
    tls: bool,
}

impl ClusterBuilder {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            name: "test-universe".into(),
            provider: CloudType::Aws,
            masters: 1,
            tservers: 0,
            replication_factor: 1,
            version: 1,
            locked: false,
            imported: false,
            editable: true,
            root_ca: None,
            tls: false,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the provider.
    #[must_use]
    pub const fn provider(mut self, provider: CloudType) -> Self {
        self.provider = provider;
        self
    }

    /// Sets the number of nodes running a master and a tablet server.
    #[must_use]
    pub const fn masters(mut self, count: usize) -> Self {
        self.masters = count;
        self
    }

    /// Sets the number of nodes running only a tablet server.
    #[must_use]
    pub const fn tservers(mut self, count: usize) -> Self {
        self.tservers = count;
        self
    }

    /// Sets the replication factor.
    #[must_use]
    pub const fn replication_factor(mut self, rf: u32) -> Self {
        self.replication_factor = rf;
        self
    }

    /// Sets the starting version.
    #[must_use]
    pub const fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Marks the cluster as locked by another operation.
    #[must_use]
    pub const fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Marks the cluster as imported.
    #[must_use]
    pub const fn imported(mut self) -> Self {
        self.imported = true;
        self
    }

    /// Marks the cluster as not editable.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    /// Enables inter-node TLS with an optional root certificate.
    #[must_use]
    pub const fn tls(mut self, root_ca: Option<CertificateId>) -> Self {
        self.tls = true;
        self.root_ca = root_ca;
        self
    }

    /// Builds the record.
    #[must_use]
    pub fn build(self) -> Cluster {
        let id = ClusterId::generate();
        let subnet = id.as_uuid().as_bytes()[0];
        let total = self.masters + self.tservers;
        let nodes = (1..=total)
            .map(|i| Node {
                name: format!("node-{i}"),
                private_ip: format!("10.{subnet}.0.{i}"),
                master_rpc_port: 7100,
                is_master: i <= self.masters,
                is_tserver: true,
                state: NodeState::Live,
            })
            .collect();
        Cluster {
            id,
            tenant_id: self.tenant_id,
            name: self.name,
            version: self.version,
            update_in_progress: self.locked,
            nodes,
            details: ClusterDetails {
                primary: ClusterSpec {
                    uuid: Uuid::new_v4(),
                    user_intent: UserIntent {
                        provider_type: self.provider,
                        replication_factor: self.replication_factor,
                        num_nodes: u32::try_from(total).unwrap_or(u32::MAX),
                        enable_node_to_node_encrypt: self.tls,
                    },
                },
                read_replicas: vec![],
                root_ca: self.root_ca,
                node_to_node_encryption: self.tls,
                imported: self.imported,
                editable: self.editable,
            },
        }
    }
}
