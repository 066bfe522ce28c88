//! Encryption-at-rest key references and the capabilities that resolve and
//! deliver them.
//!
//! The orchestrator never stores key material. It keeps a per-cluster key
//! history whose active entry points at a key reference; the reference is
//! resolved to bytes by a [`KeyManager`] and delivered to master nodes by a
//! [`NodeKeyClient`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use unimgr_core::{ClusterId, KeyConfigId};

use crate::error::{Error, Result};

/// The currently designated key of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveKey {
    /// Cluster the key protects.
    pub cluster_id: ClusterId,
    /// Key-management configuration that issued the key.
    pub config_id: KeyConfigId,
    /// Base64-encoded key reference.
    pub key_ref: String,
    /// When the key became active.
    pub activated_at: DateTime<Utc>,
}

impl ActiveKey {
    /// Returns true if the key carries a non-empty reference.
    #[must_use]
    pub fn has_key_ref(&self) -> bool {
        !self.key_ref.is_empty()
    }

    /// Decodes the stored key reference.
    ///
    /// # Errors
    ///
    /// Returns `KeyManagement` if the reference is not valid base64.
    pub fn decode_key_ref(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.key_ref.as_bytes())
            .map_err(|e| Error::KeyManagement {
                message: format!("invalid key reference for cluster {}: {e}", self.cluster_id),
            })
    }
}

/// Encodes a raw key reference for transport to nodes.
#[must_use]
pub fn encode_key_ref(key_ref: &[u8]) -> String {
    STANDARD.encode(key_ref)
}

/// Per-cluster key rotation history.
#[async_trait]
pub trait KeyHistory: Send + Sync {
    /// Returns how many key rotations have completed for the cluster.
    async fn num_key_rotations(&self, cluster_id: &ClusterId) -> Result<usize>;

    /// Returns the cluster's active key, if any.
    async fn active_key(&self, cluster_id: &ClusterId) -> Result<Option<ActiveKey>>;

    /// Deletes the cluster's history. Returns the number of entries removed.
    async fn delete_history(&self, cluster_id: &ClusterId) -> Result<usize>;
}

/// Resolves key references to key material.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Resolves `key_ref` issued by `config_id` for `cluster_id`.
    async fn resolve_key(
        &self,
        cluster_id: &ClusterId,
        config_id: &KeyConfigId,
        key_ref: &[u8],
    ) -> Result<Bytes>;
}

/// Key delivery RPCs against a single master node.
#[async_trait]
pub trait NodeKeyClient: Send + Sync {
    /// Returns true if the node already holds the key in memory.
    async fn has_key_in_memory(&self, encoded_key_ref: &str, node: &HostPort) -> Result<bool>;

    /// Loads the key into the node's memory.
    async fn push_key(&self, encoded_key_ref: &str, key: &Bytes, node: &HostPort) -> Result<()>;
}

/// A `host:port` node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    /// Host name or IP.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl HostPort {
    /// Creates an address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for HostPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidRequest {
            message: format!("invalid host:port address '{s}'"),
        };
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    key: ActiveKey,
    active: bool,
}

/// In-memory key history.
#[derive(Debug, Default)]
pub struct InMemoryKeyHistory {
    entries: RwLock<HashMap<ClusterId, Vec<HistoryEntry>>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryKeyHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed rotation; the new key becomes active.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn rotate(
        &self,
        cluster_id: ClusterId,
        config_id: KeyConfigId,
        key_ref: &[u8],
    ) -> Result<ActiveKey> {
        let key = ActiveKey {
            cluster_id,
            config_id,
            key_ref: encode_key_ref(key_ref),
            activated_at: Utc::now(),
        };
        let mut entries = self.entries.write().map_err(poison_err)?;
        let history = entries.entry(cluster_id).or_default();
        for entry in history.iter_mut() {
            entry.active = false;
        }
        history.push(HistoryEntry {
            key: key.clone(),
            active: true,
        });
        drop(entries);
        Ok(key)
    }

    /// Records a history entry verbatim, for histories imported from elsewhere.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert_raw(&self, key: ActiveKey, active: bool) -> Result<()> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        entries
            .entry(key.cluster_id)
            .or_default()
            .push(HistoryEntry { key, active });
        drop(entries);
        Ok(())
    }
}

#[async_trait]
impl KeyHistory for InMemoryKeyHistory {
    async fn num_key_rotations(&self, cluster_id: &ClusterId) -> Result<usize> {
        let count = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries.get(cluster_id).map_or(0, Vec::len)
        };
        Ok(count)
    }

    async fn active_key(&self, cluster_id: &ClusterId) -> Result<Option<ActiveKey>> {
        let result = {
            let entries = self.entries.read().map_err(poison_err)?;
            entries.get(cluster_id).and_then(|history| {
                history
                    .iter()
                    .rev()
                    .find(|e| e.active)
                    .map(|e| e.key.clone())
            })
        };
        Ok(result)
    }

    async fn delete_history(&self, cluster_id: &ClusterId) -> Result<usize> {
        let removed = {
            let mut entries = self.entries.write().map_err(poison_err)?;
            entries.remove(cluster_id).map_or(0, |h| h.len())
        };
        Ok(removed)
    }
}
