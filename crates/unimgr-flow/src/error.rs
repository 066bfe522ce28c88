//! Error types for the orchestration domain.

use unimgr_core::{BackupId, ClusterId, TaskId};

/// The result type used throughout unimgr-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another lifecycle operation holds the cluster lock.
    ///
    /// The caller must retry later; the core never retries on its own.
    #[error("cluster {cluster_id} is already being updated")]
    AlreadyLocked {
        /// The locked cluster.
        cluster_id: ClusterId,
    },

    /// The caller's view of the cluster is stale.
    #[error("cluster {cluster_id} version mismatch: expected {expected}, found {actual}")]
    VersionMismatch {
        /// The cluster whose version was checked.
        cluster_id: ClusterId,
        /// The version the caller expected.
        expected: u64,
        /// The version currently stored.
        actual: u64,
    },

    /// A cluster was not found in the registry.
    #[error("cluster not found: {cluster_id}")]
    ClusterNotFound {
        /// The cluster ID that was not found.
        cluster_id: ClusterId,
    },

    /// A node was not found in its cluster.
    #[error("node {node_name} not found in cluster {cluster_id}")]
    NodeNotFound {
        /// The cluster that was searched.
        cluster_id: ClusterId,
        /// The node name that was not found.
        node_name: String,
    },

    /// A task record was not found.
    #[error("task not found: {task_id}")]
    TaskNotFound {
        /// The task ID that was not found.
        task_id: TaskId,
    },

    /// A backup record was not found.
    #[error("backup not found: {backup_id}")]
    BackupNotFound {
        /// The backup ID that was not found.
        backup_id: BackupId,
    },

    /// The node action would leave fewer live masters than the replication factor.
    #[error(
        "cannot {action} {node_name}: {remaining_masters} live masters would remain, \
         replication factor is {replication_factor}"
    )]
    QuorumViolation {
        /// The node the action targeted.
        node_name: String,
        /// The rejected action.
        action: String,
        /// Live masters left if the action were applied.
        remaining_masters: usize,
        /// The configured replication factor.
        replication_factor: u32,
    },

    /// The cluster's certificate reference is missing or incomplete.
    #[error("invalid certificate: {message}")]
    InvalidCertificate {
        /// Description of what is wrong with the certificate.
        message: String,
    },

    /// The action cannot be requested externally.
    #[error("node action not allowed for this action type: {action}")]
    UnsupportedAction {
        /// The rejected action.
        action: String,
    },

    /// Node actions are disabled for the cluster.
    #[error("node actions cannot be performed on cluster {cluster_id}")]
    ClusterNotEditable {
        /// The cluster that rejected the action.
        cluster_id: ClusterId,
    },

    /// Only completed backups may be deleted.
    #[error("backup {backup_id} cannot be deleted while {state}")]
    BackupNotCompleted {
        /// The backup that was rejected.
        backup_id: BackupId,
        /// Its current state.
        state: String,
    },

    /// The request is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// A task cannot be resubmitted.
    #[error("task {task_id} cannot be retried: {reason}")]
    RetryNotAllowed {
        /// The task whose retry was rejected.
        task_id: TaskId,
        /// Why the retry was rejected.
        reason: String,
    },

    /// A subtask reached a terminal failure and aborted its queue.
    #[error("subtask {task_type} ({task_id}) failed: {message}")]
    SubtaskFailure {
        /// The failed subtask.
        task_id: TaskId,
        /// The subtask's type.
        task_type: String,
        /// The subtask's diagnostic message.
        message: String,
    },

    /// An RPC to a cluster node failed.
    #[error("transport error talking to {address}: {message}")]
    Transport {
        /// The node address.
        address: String,
        /// Description of the failure.
        message: String,
    },

    /// The key-management collaborator failed.
    #[error("key management error: {message}")]
    KeyManagement {
        /// Description of the failure.
        message: String,
    },

    /// An external collaborator (node manager, DNS, monitoring) failed.
    #[error("{service} failed: {message}")]
    Collaborator {
        /// The collaborator that failed.
        service: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An operation terminated abnormally (for example, a panicking subtask).
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// An error from unimgr-core.
    #[error("core error: {0}")]
    Core(#[from] unimgr_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new transport error for a node address.
    #[must_use]
    pub fn transport(address: impl ToString, message: impl Into<String>) -> Self {
        Self::Transport {
            address: address.to_string(),
            message: message.into(),
        }
    }

    /// Creates a new collaborator error.
    #[must_use]
    pub fn collaborator(service: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service,
            message: message.into(),
        }
    }

    /// Returns true for rejections raised before anything is dispatched.
    #[must_use]
    pub const fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            Self::QuorumViolation { .. }
                | Self::InvalidCertificate { .. }
                | Self::UnsupportedAction { .. }
                | Self::ClusterNotEditable { .. }
                | Self::BackupNotCompleted { .. }
                | Self::InvalidRequest { .. }
        )
    }

    /// Returns true if the error came from cluster lock acquisition.
    #[must_use]
    pub const fn is_lock_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyLocked { .. } | Self::VersionMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn version_mismatch_display() {
        let err = Error::VersionMismatch {
            cluster_id: ClusterId::generate(),
            expected: 4,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 4"));
        assert!(msg.contains("found 5"));
    }

    #[test]
    fn quorum_violation_is_admission_rejection() {
        let err = Error::QuorumViolation {
            node_name: "n1".into(),
            action: "STOP".into(),
            remaining_masters: 2,
            replication_factor: 3,
        };
        assert!(err.is_admission_rejection());
        assert!(!err.is_lock_conflict());
    }

    #[test]
    fn lock_errors_are_lock_conflicts() {
        let err = Error::AlreadyLocked {
            cluster_id: ClusterId::generate(),
        };
        assert!(err.is_lock_conflict());
        assert!(!err.is_admission_rejection());
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::storage_with_source("failed to read", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }
}
