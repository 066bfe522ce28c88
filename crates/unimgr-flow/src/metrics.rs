//! Observability metrics for the orchestrator.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `unimgr_task_transitions_total` | Counter | `task_type`, `to_state` | Task state transitions |
//! | `unimgr_operations_total` | Counter | `operation`, `result` | Lifecycle operation outcomes |
//! | `unimgr_operation_duration_seconds` | Histogram | `operation`, `result` | Lifecycle operation duration |
//! | `unimgr_lock_acquisitions_total` | Counter | `result` | Cluster lock attempts |
//! | `unimgr_group_duration_seconds` | Histogram | `group` | Subtask group duration |
//! | `unimgr_active_operations` | Gauge | - | Operations holding a worker slot |
//! | `unimgr_rekey_ticks_total` | Counter | `status` | Rekey tick outcomes |
//! | `unimgr_rekey_tick_duration_seconds` | Histogram | - | Rekey tick processing time |
//! | `unimgr_key_pushes_total` | Counter | `result` | Per-node key deliveries |
//!
//! Recording without an installed recorder is a no-op.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Task state transitions.
    pub const TASK_TRANSITIONS_TOTAL: &str = "unimgr_task_transitions_total";
    /// Counter: Lifecycle operation outcomes.
    pub const OPERATIONS_TOTAL: &str = "unimgr_operations_total";
    /// Histogram: Lifecycle operation duration in seconds.
    pub const OPERATION_DURATION_SECONDS: &str = "unimgr_operation_duration_seconds";
    /// Counter: Cluster lock acquisition attempts.
    pub const LOCK_ACQUISITIONS_TOTAL: &str = "unimgr_lock_acquisitions_total";
    /// Histogram: Subtask group duration in seconds.
    pub const GROUP_DURATION_SECONDS: &str = "unimgr_group_duration_seconds";
    /// Gauge: Operations currently holding a worker slot.
    pub const ACTIVE_OPERATIONS: &str = "unimgr_active_operations";
    /// Counter: Rekey ticks by outcome.
    pub const REKEY_TICKS_TOTAL: &str = "unimgr_rekey_ticks_total";
    /// Histogram: Rekey tick processing time in seconds.
    pub const REKEY_TICK_DURATION_SECONDS: &str = "unimgr_rekey_tick_duration_seconds";
    /// Counter: Per-node key deliveries.
    pub const KEY_PUSHES_TOTAL: &str = "unimgr_key_pushes_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Task type.
    pub const TASK_TYPE: &str = "task_type";
    /// Target task state.
    pub const TO_STATE: &str = "to_state";
    /// Lifecycle operation.
    pub const OPERATION: &str = "operation";
    /// Result (success, failure, already_locked, ...).
    pub const RESULT: &str = "result";
    /// Subtask group type.
    pub const GROUP: &str = "group";
    /// Tick status (completed, skipped_follower, skipped_busy).
    pub const STATUS: &str = "status";
}

/// High-level interface for recording orchestrator metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorMetrics {
    _private: (),
}

impl OrchestratorMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task state transition.
    pub fn record_task_transition(&self, task_type: &str, to_state: &str) {
        counter!(
            names::TASK_TRANSITIONS_TOTAL,
            labels::TASK_TYPE => task_type.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records the outcome and duration of a lifecycle operation.
    pub fn record_operation(&self, operation: &str, result: &str, duration: Duration) {
        counter!(
            names::OPERATIONS_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
        histogram!(
            names::OPERATION_DURATION_SECONDS,
            labels::OPERATION => operation.to_string(),
            labels::RESULT => result.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a cluster lock acquisition attempt.
    pub fn record_lock_acquisition(&self, result: &str) {
        counter!(
            names::LOCK_ACQUISITIONS_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records how long a subtask group took.
    pub fn observe_group_duration(&self, group: &str, duration: Duration) {
        histogram!(
            names::GROUP_DURATION_SECONDS,
            labels::GROUP => group.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Sets the number of operations holding a worker slot.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_active_operations(&self, count: usize) {
        gauge!(names::ACTIVE_OPERATIONS).set(count as f64);
    }

    /// Records a rekey tick outcome.
    pub fn record_rekey_tick(&self, status: &str) {
        counter!(
            names::REKEY_TICKS_TOTAL,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records a per-node key delivery outcome.
    pub fn record_key_push(&self, result: &str) {
        counter!(
            names::KEY_PUSHES_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust
/// use unimgr_flow::metrics::{OrchestratorMetrics, TimingGuard};
///
/// let metrics = OrchestratorMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_group_duration("RemovingUnusedServers", duration);
///     });
///
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard for rekey tick metrics.
#[must_use]
pub fn time_rekey_tick() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| {
        histogram!(names::REKEY_TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    })
}
