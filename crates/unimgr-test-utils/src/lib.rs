//! Shared test utilities for unimgr integration tests.
//!
//! This crate provides:
//! - [`TestContext`]: In-memory stores wired to scripted collaborators
//! - [`ClusterFactory`]: Cluster records with sensible defaults
//! - [`RecordingServices`]: Infrastructure fakes that record every call
//! - [`ScriptedNodeKeyClient`]: Key delivery fake with failure injection
//!   and a gate for holding pushes open
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use unimgr_test_utils::{ClusterFactory, TestContext, assert_task_succeeded};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let cluster = ctx.insert_cluster(ClusterFactory::three_masters(ctx.tenant_id)).await;
//!     // ... submit and wait ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod keys;
pub mod services;

pub use assertions::*;
pub use fixtures::*;
pub use keys::*;
pub use services::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("unimgr_flow=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
