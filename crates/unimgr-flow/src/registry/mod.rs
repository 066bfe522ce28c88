//! Cluster registry with an optimistic, versioned exclusive lock.
//!
//! The registry is the only mutual-exclusion primitive in the orchestrator.
//! A lifecycle operation acquires a cluster's lock before building its queue
//! and releases it on every exit path.
//!
//! ## Lock Semantics
//!
//! - `acquire_lock` checks the caller's expected version first, then the lock
//!   flag; `force` bypasses only the lock flag
//! - `release_lock` clears the flag and increments the version; releasing an
//!   unlocked or missing cluster is a no-op

pub mod memory;

use async_trait::async_trait;

use unimgr_core::{ClusterId, TenantId};

use crate::cluster::{Cluster, NodeState};
use crate::error::{Error, Result};

/// Storage and locking for cluster records.
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Inserts or replaces a cluster record.
    async fn insert(&self, cluster: Cluster) -> Result<()>;

    /// Gets a cluster by ID.
    ///
    /// Returns `None` if the cluster does not exist.
    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>>;

    /// Gets a cluster by ID, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ClusterNotFound` if the cluster does not exist.
    async fn get_or_fail(&self, id: &ClusterId) -> Result<Cluster> {
        self.get(id)
            .await?
            .ok_or(Error::ClusterNotFound { cluster_id: *id })
    }

    /// Lists the clusters owned by a tenant.
    async fn list_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Cluster>>;

    /// Deletes a cluster record. Returns true if it existed.
    async fn remove(&self, id: &ClusterId) -> Result<bool>;

    /// Records a node's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `ClusterNotFound` or `NodeNotFound` if either is absent.
    async fn update_node_state(&self, id: &ClusterId, node_name: &str, state: NodeState)
    -> Result<()>;

    /// Records whether a node runs a master process.
    ///
    /// # Errors
    ///
    /// Returns `ClusterNotFound` or `NodeNotFound` if either is absent.
    async fn set_node_master(&self, id: &ClusterId, node_name: &str, is_master: bool)
    -> Result<()>;

    /// Acquires the cluster's exclusive lock and returns a snapshot.
    ///
    /// `expected_version` of `None` accepts any version.
    ///
    /// # Errors
    ///
    /// - `ClusterNotFound` if the cluster does not exist
    /// - `VersionMismatch` if the stored version differs from `expected_version`
    /// - `AlreadyLocked` if the lock is held and `force` is false
    async fn acquire_lock(
        &self,
        id: &ClusterId,
        expected_version: Option<u64>,
        force: bool,
    ) -> Result<Cluster>;

    /// Releases the cluster's lock.
    ///
    /// Idempotent: an unlocked or missing cluster is left untouched.
    async fn release_lock(&self, id: &ClusterId) -> Result<()>;
}
