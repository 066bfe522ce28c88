//! In-memory cluster registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use unimgr_core::{ClusterId, TenantId};

use super::ClusterRegistry;
use crate::cluster::{Cluster, Node, NodeState};
use crate::error::{Error, Result};

/// In-memory cluster registry.
///
/// A single `RwLock` guards every record, so lock acquisition is a
/// check-and-set under one write guard.
#[derive(Debug, Default)]
pub struct InMemoryClusterRegistry {
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryClusterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of clusters currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn cluster_count(&self) -> Result<usize> {
        let count = {
            let clusters = self.clusters.read().map_err(poison_err)?;
            clusters.len()
        };
        Ok(count)
    }

    fn with_node<F>(&self, id: &ClusterId, node_name: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let mut clusters = self.clusters.write().map_err(poison_err)?;
        let cluster = clusters
            .get_mut(id)
            .ok_or(Error::ClusterNotFound { cluster_id: *id })?;
        let node = cluster
            .node_mut(node_name)
            .ok_or_else(|| Error::NodeNotFound {
                cluster_id: *id,
                node_name: node_name.to_string(),
            })?;
        update(node);
        drop(clusters);
        Ok(())
    }
}

#[async_trait]
impl ClusterRegistry for InMemoryClusterRegistry {
    async fn insert(&self, cluster: Cluster) -> Result<()> {
        let mut clusters = self.clusters.write().map_err(poison_err)?;
        clusters.insert(cluster.id, cluster);
        drop(clusters);
        Ok(())
    }

    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>> {
        let result = {
            let clusters = self.clusters.read().map_err(poison_err)?;
            clusters.get(id).cloned()
        };
        Ok(result)
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Cluster>> {
        let mut result: Vec<Cluster> = {
            let clusters = self.clusters.read().map_err(poison_err)?;
            clusters
                .values()
                .filter(|c| c.tenant_id == *tenant_id)
                .cloned()
                .collect()
        };
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn remove(&self, id: &ClusterId) -> Result<bool> {
        let removed = {
            let mut clusters = self.clusters.write().map_err(poison_err)?;
            clusters.remove(id).is_some()
        };
        Ok(removed)
    }

    async fn update_node_state(
        &self,
        id: &ClusterId,
        node_name: &str,
        state: NodeState,
    ) -> Result<()> {
        self.with_node(id, node_name, |node| node.state = state)
    }

    async fn set_node_master(&self, id: &ClusterId, node_name: &str, is_master: bool) -> Result<()> {
        self.with_node(id, node_name, |node| node.is_master = is_master)
    }

    #[tracing::instrument(skip(self), fields(cluster_id = %id))]
    async fn acquire_lock(
        &self,
        id: &ClusterId,
        expected_version: Option<u64>,
        force: bool,
    ) -> Result<Cluster> {
        let mut clusters = self.clusters.write().map_err(poison_err)?;
        let Some(cluster) = clusters.get_mut(id) else {
            drop(clusters);
            return Err(Error::ClusterNotFound { cluster_id: *id });
        };

        if let Some(expected) = expected_version {
            if cluster.version != expected {
                let actual = cluster.version;
                drop(clusters);
                return Err(Error::VersionMismatch {
                    cluster_id: *id,
                    expected,
                    actual,
                });
            }
        }

        if cluster.update_in_progress && !force {
            drop(clusters);
            return Err(Error::AlreadyLocked { cluster_id: *id });
        }

        cluster.update_in_progress = true;
        let snapshot = cluster.clone();
        drop(clusters);
        tracing::debug!(version = snapshot.version, "cluster locked");
        Ok(snapshot)
    }

    #[tracing::instrument(skip(self), fields(cluster_id = %id))]
    async fn release_lock(&self, id: &ClusterId) -> Result<()> {
        let mut clusters = self.clusters.write().map_err(poison_err)?;
        if let Some(cluster) = clusters.get_mut(id) {
            if cluster.update_in_progress {
                cluster.update_in_progress = false;
                cluster.version += 1;
                tracing::debug!(version = cluster.version, "cluster unlocked");
            }
        }
        drop(clusters);
        Ok(())
    }
}
