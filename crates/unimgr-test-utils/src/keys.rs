//! Key management, key delivery and tenant enumeration fakes.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, Semaphore};

use unimgr_core::{ClusterId, KeyConfigId, TenantId};
use unimgr_flow::error::{Error, Result};
use unimgr_flow::kms::{HostPort, KeyManager, NodeKeyClient};
use unimgr_flow::rekey::TenantDirectory;

/// Resolves every key reference to `key:` followed by the reference.
#[derive(Debug, Default)]
pub struct ScriptedKeyManager {
    failing: Mutex<HashSet<ClusterId>>,
    resolved: Mutex<Vec<ClusterId>>,
}

impl ScriptedKeyManager {
    /// Creates a key manager that resolves everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes resolution fail for a cluster.
    pub fn fail_cluster(&self, cluster_id: ClusterId) {
        self.failing.lock().expect("lock").insert(cluster_id);
    }

    /// Returns the clusters whose keys were resolved, in order.
    #[must_use]
    pub fn resolved(&self) -> Vec<ClusterId> {
        self.resolved.lock().expect("lock").clone()
    }
}

#[async_trait]
impl KeyManager for ScriptedKeyManager {
    async fn resolve_key(
        &self,
        cluster_id: &ClusterId,
        _config_id: &KeyConfigId,
        key_ref: &[u8],
    ) -> Result<Bytes> {
        if self.failing.lock().expect("lock").contains(cluster_id) {
            return Err(Error::KeyManagement {
                message: format!("kms unreachable for cluster {cluster_id}"),
            });
        }
        self.resolved.lock().expect("lock").push(*cluster_id);
        let mut key = b"key:".to_vec();
        key.extend_from_slice(key_ref);
        Ok(Bytes::from(key))
    }
}

/// Record of a key delivery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOp {
    /// In-memory check.
    Check {
        /// Node asked.
        node: HostPort,
    },
    /// Key push.
    Push {
        /// Node pushed to.
        node: HostPort,
        /// Encoded key reference sent.
        key_ref: String,
    },
}

/// Key delivery fake.
///
/// Nodes start without the key. A push loads it. A gated client holds every
/// push open until [`Self::open_gate`] is called.
#[derive(Debug, Default)]
pub struct ScriptedNodeKeyClient {
    loaded: Mutex<HashSet<HostPort>>,
    unreachable: Mutex<HashSet<String>>,
    calls: Mutex<Vec<KeyOp>>,
    gate: Option<Arc<Semaphore>>,
    entered: Notify,
}

impl ScriptedNodeKeyClient {
    /// Creates a client whose pushes complete immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client whose pushes block until the gate opens.
    #[must_use]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Releases every blocked and future push.
    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1024);
        }
    }

    /// Waits until a push has started.
    pub async fn wait_for_push(&self) {
        self.entered.notified().await;
    }

    /// Marks a node as already holding the key.
    pub fn mark_loaded(&self, node: HostPort) {
        self.loaded.lock().expect("lock").insert(node);
    }

    /// Makes every call to a host fail with a transport error.
    pub fn make_unreachable(&self, host: impl Into<String>) {
        self.unreachable.lock().expect("lock").insert(host.into());
    }

    /// Returns all recorded calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<KeyOp> {
        self.calls.lock().expect("lock").clone()
    }

    /// Returns the nodes pushed to, in order.
    #[must_use]
    pub fn pushes(&self) -> Vec<HostPort> {
        self.calls()
            .into_iter()
            .filter_map(|op| match op {
                KeyOp::Push { node, .. } => Some(node),
                KeyOp::Check { .. } => None,
            })
            .collect()
    }

    fn check_reachable(&self, node: &HostPort) -> Result<()> {
        if self.unreachable.lock().expect("lock").contains(&node.host) {
            return Err(Error::transport(node, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeKeyClient for ScriptedNodeKeyClient {
    async fn has_key_in_memory(&self, _encoded_key_ref: &str, node: &HostPort) -> Result<bool> {
        self.calls
            .lock()
            .expect("lock")
            .push(KeyOp::Check { node: node.clone() });
        self.check_reachable(node)?;
        Ok(self.loaded.lock().expect("lock").contains(node))
    }

    async fn push_key(&self, encoded_key_ref: &str, _key: &Bytes, node: &HostPort) -> Result<()> {
        self.calls.lock().expect("lock").push(KeyOp::Push {
            node: node.clone(),
            key_ref: encoded_key_ref.to_string(),
        });
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| Error::transport(node, "gate closed"))?;
        }
        self.check_reachable(node)?;
        self.loaded.lock().expect("lock").insert(node.clone());
        Ok(())
    }
}

/// Fixed tenant to cluster mapping.
#[derive(Debug, Default)]
pub struct StaticTenantDirectory {
    clusters: Mutex<BTreeMap<TenantId, Vec<ClusterId>>>,
    failing: Mutex<HashSet<TenantId>>,
}

impl StaticTenantDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cluster under its tenant.
    pub fn add(&self, tenant_id: TenantId, cluster_id: ClusterId) {
        self.clusters
            .lock()
            .expect("lock")
            .entry(tenant_id)
            .or_default()
            .push(cluster_id);
    }

    /// Makes listing a tenant's clusters fail.
    pub fn fail_tenant(&self, tenant_id: TenantId) {
        self.clusters
            .lock()
            .expect("lock")
            .entry(tenant_id)
            .or_default();
        self.failing.lock().expect("lock").insert(tenant_id);
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn list_tenants(&self) -> Result<Vec<TenantId>> {
        Ok(self.clusters.lock().expect("lock").keys().copied().collect())
    }

    async fn list_clusters_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<ClusterId>> {
        if self.failing.lock().expect("lock").contains(tenant_id) {
            return Err(Error::storage(format!("tenant {tenant_id} unavailable")));
        }
        Ok(self
            .clusters
            .lock()
            .expect("lock")
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
