//! Observability infrastructure for unimgr.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors shared by every component.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::id::{ClusterId, TaskId, TenantId};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name (`json` or `pretty`, case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `unimgr_flow=debug`)
///
/// # Example
///
/// ```rust
/// use unimgr_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
        // Another subscriber (e.g. a test harness) may already be installed.
        let _ = result;
    });
}

/// Creates a span for a lifecycle operation with standard fields.
///
/// # Example
///
/// ```rust
/// use unimgr_core::observability::orchestration_span;
/// use unimgr_core::{ClusterId, TaskId, TenantId};
///
/// let span = orchestration_span(
///     "destroy_universe",
///     &TaskId::generate(),
///     &ClusterId::generate(),
///     &TenantId::generate(),
/// );
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn orchestration_span(
    operation: &str,
    task_id: &TaskId,
    cluster_id: &ClusterId,
    tenant_id: &TenantId,
) -> Span {
    tracing::info_span!(
        "orchestration",
        op = operation,
        task_id = %task_id,
        cluster_id = %cluster_id,
        tenant_id = %tenant_id,
    )
}

/// Creates a span for one pass of the background key setter.
#[must_use]
pub fn rekey_span(tick: u64) -> Span {
    tracing::debug_span!("rekey", tick = tick)
}
