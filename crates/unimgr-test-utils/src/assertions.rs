//! Custom assertion helpers for integration tests.

use unimgr_flow::cluster::Cluster;
use unimgr_flow::progress::TaskStatus;
use unimgr_flow::task::{TaskInfo, TaskState};

/// Asserts that a task completed successfully.
///
/// # Panics
///
/// Panics if the task did not succeed or did not report 100 percent.
pub fn assert_task_succeeded(status: &TaskStatus) {
    assert_eq!(
        status.state,
        TaskState::Success,
        "Expected task to succeed, but state was {:?} ({:?})",
        status.state,
        status.error
    );
    assert_eq!(status.percent, 100, "Expected 100 percent on success");
}

/// Asserts that a task failed with an error mentioning `detail`.
///
/// # Panics
///
/// Panics if the task did not fail or its error lacks `detail`.
pub fn assert_task_failed(status: &TaskStatus, detail: &str) {
    assert_eq!(
        status.state,
        TaskState::Failure,
        "Expected task to fail, but state was {:?}",
        status.state
    );
    assert!(status.percent < 100, "A failed task must not report 100 percent");
    let error = status.error.as_deref().unwrap_or_default();
    assert!(
        error.contains(detail),
        "Expected error to mention {detail:?}, got {error:?}"
    );
}

/// Asserts that a cluster is not locked.
///
/// # Panics
///
/// Panics if the cluster's lock flag is set.
pub fn assert_unlocked(cluster: &Cluster) {
    assert!(
        !cluster.update_in_progress,
        "Expected cluster {} to be unlocked",
        cluster.id
    );
}

/// Asserts that no subtask at a later position started before every subtask
/// at an earlier position finished.
///
/// # Panics
///
/// Panics if a later group has a non-`Created` subtask while an earlier
/// group has a subtask that never succeeded.
pub fn assert_groups_gated(subtasks: &[TaskInfo]) {
    let first_unsuccessful = subtasks
        .iter()
        .filter(|t| t.state != TaskState::Success)
        .map(|t| t.position)
        .min();
    let Some(blocked_after) = first_unsuccessful else {
        return;
    };
    for task in subtasks.iter().filter(|t| t.position > blocked_after) {
        assert!(
            matches!(task.state, TaskState::Created | TaskState::Aborted),
            "Subtask {} at position {} ran after position {blocked_after} failed (state {:?})",
            task.task_type,
            task.position,
            task.state
        );
    }
}
