//! Strongly-typed identifiers for unimgr entities.
//!
//! All identifiers are:
//! - **Strongly typed**: Prevents mixing up a cluster ID with a task ID at compile time
//! - **Globally unique**: Random (v4) UUIDs, no coordination required for generation
//! - **Transparent on the wire**: Serialized as the bare UUID string
//!
//! # Example
//!
//! ```rust
//! use unimgr_core::id::{ClusterId, TaskId};
//!
//! let cluster = ClusterId::generate();
//! let parsed: ClusterId = cluster.to_string().parse().unwrap();
//! assert_eq!(cluster, parsed);
//!
//! // IDs are different types - this won't compile:
//! // let wrong: TaskId = cluster;
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
                    message: format!("invalid {} ID '{s}': {e}", $label),
                })
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// A managed database cluster ("universe").
    ClusterId,
    "cluster"
);

uuid_id!(
    /// A persisted task execution record, top-level or subtask.
    TaskId,
    "task"
);

uuid_id!(
    /// A tenant ("customer") owning a set of clusters.
    TenantId,
    "tenant"
);

uuid_id!(
    /// A backup of one or more tables of a cluster.
    BackupId,
    "backup"
);

uuid_id!(
    /// A TLS certificate referenced by a cluster.
    CertificateId,
    "certificate"
);

uuid_id!(
    /// A key-management configuration that issued an encryption key.
    KeyConfigId,
    "key config"
);
