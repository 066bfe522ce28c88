//! # unimgr-flow
//!
//! Task orchestration core for managed distributed database clusters
//! ("universes").
//!
//! This crate implements the lifecycle domain, providing:
//!
//! - **Cluster locking**: Optimistic, versioned exclusive lock per cluster
//! - **Subtask group queues**: Ordered groups of concurrently runnable subtasks
//! - **Lifecycle operations**: Destroy, backup and node actions built on one
//!   lock/build/run/unlock envelope
//! - **Progress tracking**: Percent-complete and status projections for observers
//! - **Key reconciliation**: A single-flight background job that pushes active
//!   encryption keys to every control node
//!
//! ## Core Concepts
//!
//! - **Cluster**: A managed deployment with a versioned lock flag and a node table
//! - **Task**: A persisted execution record with a terminal state written once
//! - **Subtask group**: One ordered step of a lifecycle operation
//!
//! ## Guarantees
//!
//! - **Exclusive**: At most one lifecycle operation holds a cluster's lock
//! - **Ordered**: Groups run strictly in order; a failed group stops the queue
//! - **Always unlocked**: A held lock is released on every exit path without
//!   masking the original error

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod backup;
pub mod certificate;
pub mod cluster;
pub mod commissioner;
pub mod config;
pub mod error;
pub mod ha;
pub mod kms;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod rekey;
pub mod services;
pub mod store;
pub mod subtask;
pub mod task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cluster::{Cluster, Node, NodeActionType, NodeState};
    pub use crate::commissioner::Commissioner;
    pub use crate::config::OrchestratorConfig;
    pub use crate::error::{Error, Result};
    pub use crate::lifecycle::{Dependencies, LifecycleOperation, LockPolicy, TaskParams};
    pub use crate::progress::{ProgressTracker, TaskStatus};
    pub use crate::queue::{SubtaskGroup, SubtaskGroupQueue};
    pub use crate::registry::ClusterRegistry;
    pub use crate::rekey::{RekeyScheduler, TickOutcome};
    pub use crate::store::{CasResult, TaskStore};
    pub use crate::subtask::{Subtask, SubtaskContext};
    pub use crate::task::{TaskInfo, TaskState, TaskType};
}
