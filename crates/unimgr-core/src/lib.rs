//! # unimgr-core
//!
//! Core primitives shared by the unimgr cluster lifecycle orchestrator.
//!
//! This crate provides the foundational types used across all unimgr crates:
//!
//! - **Identifiers**: Strongly-typed UUID identifiers for clusters, tasks,
//!   tenants, backups, certificates and key configurations
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialisation and span constructors
//!
//! ## Example
//!
//! ```rust
//! use unimgr_core::prelude::*;
//!
//! let cluster = ClusterId::generate();
//! let tenant = TenantId::generate();
//! assert_ne!(cluster.as_uuid(), tenant.as_uuid());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{BackupId, CertificateId, ClusterId, KeyConfigId, TaskId, TenantId};
}

pub use error::{Error, Result};
pub use id::{BackupId, CertificateId, ClusterId, KeyConfigId, TaskId, TenantId};
pub use observability::{LogFormat, init_logging};
