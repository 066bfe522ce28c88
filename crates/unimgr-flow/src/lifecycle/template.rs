//! The lock/build/run/unlock envelope shared by every lifecycle operation.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tracing::Instrument;

use unimgr_core::observability::orchestration_span;
use unimgr_core::{TaskId, TenantId};

use super::{Dependencies, LifecycleOperation, LockPolicy, OperationScope};
use crate::error::{Error, Result};
use crate::queue::QueueOptions;
use crate::store::CasResult;
use crate::task::TaskState;

/// Runs `op` as top-level task `task_id` to a terminal state.
///
/// The task record must already exist in `Created` state. A lock taken here
/// is released on every exit path, including a panicking subtask; a failure
/// to release is logged and never replaces the operation's own error.
///
/// # Errors
///
/// Returns the operation's failure: a lock error, a build error, or the
/// `SubtaskFailure` that aborted the queue.
pub async fn run_lifecycle(
    op: &dyn LifecycleOperation,
    task_id: TaskId,
    tenant_id: TenantId,
    deps: &Dependencies,
    options: &QueueOptions,
) -> Result<()> {
    let task_type = op.task_type();
    let operation = task_type.to_string();
    let span = orchestration_span(&operation, &task_id, &op.cluster_id(), &tenant_id);
    let started = Instant::now();

    async move {
        set_task_state(deps, &task_id, TaskState::Created, TaskState::Running, None).await?;
        options
            .metrics
            .record_task_transition(&operation, TaskState::Running.as_label());
        tracing::info!("lifecycle operation started");

        let mut scope = OperationScope::new(task_id, tenant_id, op.cluster_id());
        let result = execute(op, &mut scope, deps, options).await;

        if let Err(err) = &result {
            if let Err(hook_err) = op.on_failure(&scope, deps, err).await {
                tracing::error!(error = %hook_err, "failure hook failed");
            }
        }

        let (target, message, label) = match &result {
            Ok(()) => (TaskState::Success, None, "success"),
            Err(err) => (TaskState::Failure, Some(err.to_string()), "failure"),
        };
        if let Err(err) =
            set_task_state(deps, &task_id, TaskState::Running, target, message).await
        {
            tracing::error!(error = %err, to = %target, "failed to record task outcome");
        } else {
            options
                .metrics
                .record_task_transition(&operation, target.as_label());
        }
        if let Err(err) = deps.ledger.mark_completed(&task_id, Utc::now()).await {
            tracing::error!(error = %err, "failed to mark ledger entry completed");
        }
        options
            .metrics
            .record_operation(&operation, label, started.elapsed());

        match &result {
            Ok(()) => tracing::info!(elapsed = ?started.elapsed(), "lifecycle operation succeeded"),
            Err(err) => tracing::error!(error = %err, "lifecycle operation failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn execute(
    op: &dyn LifecycleOperation,
    scope: &mut OperationScope,
    deps: &Dependencies,
    options: &QueueOptions,
) -> Result<()> {
    let locked = match op.lock_policy() {
        LockPolicy::Exclusive {
            expected_version,
            force,
        } => {
            match deps
                .registry
                .acquire_lock(&scope.cluster_id, expected_version, force)
                .await
            {
                Ok(cluster) => {
                    options.metrics.record_lock_acquisition("acquired");
                    tracing::debug!(version = cluster.version, force, "cluster lock acquired");
                    scope.cluster = Some(cluster);
                }
                Err(err) => {
                    let label = match &err {
                        Error::AlreadyLocked { .. } => "already_locked",
                        Error::VersionMismatch { .. } => "version_mismatch",
                        _ => "error",
                    };
                    options.metrics.record_lock_acquisition(label);
                    tracing::warn!(error = %err, "cluster lock not acquired");
                    return Err(err);
                }
            }
            true
        }
        LockPolicy::Unlocked => {
            scope.cluster = deps.registry.get(&scope.cluster_id).await?;
            false
        }
    };

    let result = AssertUnwindSafe(run_queue(op, scope, deps, options))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Error::Internal {
            message: panic_message(panic.as_ref()),
        }));

    if locked {
        if let Err(err) = deps.registry.release_lock(&scope.cluster_id).await {
            tracing::error!(error = %err, "failed to release cluster lock");
        }
    }

    if result.is_ok() {
        if let Err(err) = op.on_success(scope, deps).await {
            tracing::error!(error = %err, "post-commit hook failed");
        }
    }
    result
}

async fn run_queue(
    op: &dyn LifecycleOperation,
    scope: &OperationScope,
    deps: &Dependencies,
    options: &QueueOptions,
) -> Result<()> {
    let queue = op.build_queue(scope, deps).await?;
    tracing::debug!(
        groups = queue.groups().len(),
        subtasks = queue.task_count(),
        "queue built"
    );
    let report = queue.run(deps.tasks.as_ref(), options).await?;
    tracing::debug!(
        groups = report.groups,
        succeeded = report.succeeded,
        tolerated_failures = report.tolerated_failures,
        "queue finished"
    );
    Ok(())
}

async fn set_task_state(
    deps: &Dependencies,
    task_id: &TaskId,
    expected: TaskState,
    target: TaskState,
    message: Option<String>,
) -> Result<()> {
    match deps.tasks.cas_state(task_id, expected, target, message).await? {
        CasResult::Success => Ok(()),
        CasResult::NotFound => Err(Error::TaskNotFound { task_id: *task_id }),
        CasResult::StateMismatch { actual } => Err(Error::InvalidStateTransition {
            from: actual.to_string(),
            to: target.to_string(),
            reason: format!("task {task_id} expected {expected}"),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("operation panicked: {detail}")
}
