//! Ordered execution of subtask groups.
//!
//! A [`SubtaskGroupQueue`] is built once per lifecycle operation and run
//! exactly once; [`SubtaskGroupQueue::run`] consumes it.
//!
//! ## Execution Rules
//!
//! - Every subtask record is written `Created` before the first group starts,
//!   so observers see the full plan from the outset
//! - Groups run strictly in order; a group starts only after every task of
//!   the previous group reached a terminal state
//! - Tasks inside a group run concurrently, bounded by the group's parallelism
//! - When a task that is not best-effort fails, nothing further is launched;
//!   in-flight siblings finish, the unlaunched tasks and every task of later
//!   groups are written `Aborted`, and the queue fails with that task's error
//! - A best-effort task's failure is recorded but does not fail its group
//! - A panicking subtask is recorded as a `Failure` carrying the panic message
//! - If a record cannot be written, the remaining `Created` records are still
//!   aborted before the storage error is returned

use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use futures::stream::FuturesUnordered;

use unimgr_core::{ClusterId, TaskId, TenantId};

use crate::error::{Error, Result};
use crate::metrics::{OrchestratorMetrics, TimingGuard};
use crate::store::{CasResult, TaskStore};
use crate::subtask::{Subtask, SubtaskContext};
use crate::task::{SubtaskGroupType, TaskInfo, TaskState, TaskType};

/// A subtask together with its failure policy.
#[derive(Clone)]
pub struct QueuedSubtask {
    subtask: Arc<dyn Subtask>,
    best_effort: bool,
}

impl QueuedSubtask {
    /// Returns true if a failure of this subtask is tolerated.
    #[must_use]
    pub const fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Returns the wrapped subtask's type.
    #[must_use]
    pub fn task_type(&self) -> TaskType {
        self.subtask.task_type()
    }
}

impl std::fmt::Debug for QueuedSubtask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedSubtask")
            .field("task_type", &self.subtask.task_type())
            .field("best_effort", &self.best_effort)
            .finish()
    }
}

/// A named, ordered step of a lifecycle operation.
#[derive(Debug, Clone)]
pub struct SubtaskGroup {
    name: String,
    group_type: SubtaskGroupType,
    parallelism: Option<NonZeroUsize>,
    tasks: Vec<QueuedSubtask>,
}

impl SubtaskGroup {
    /// Creates an empty group with unbounded parallelism.
    #[must_use]
    pub fn new(name: impl Into<String>, group_type: SubtaskGroupType) -> Self {
        Self {
            name: name.into(),
            group_type,
            parallelism: None,
            tasks: Vec::new(),
        }
    }

    /// Bounds how many of the group's tasks run at once.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: NonZeroUsize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Adds a subtask whose failure fails the group.
    pub fn push(&mut self, subtask: impl Subtask + 'static) {
        self.push_with_policy(subtask, false);
    }

    /// Adds a subtask whose failure is recorded but tolerated.
    pub fn push_best_effort(&mut self, subtask: impl Subtask + 'static) {
        self.push_with_policy(subtask, true);
    }

    /// Adds a subtask with an explicit failure policy.
    pub fn push_with_policy(&mut self, subtask: impl Subtask + 'static, best_effort: bool) {
        self.tasks.push(QueuedSubtask {
            subtask: Arc::new(subtask),
            best_effort,
        });
    }

    /// Returns the group's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the group's observer-facing label.
    #[must_use]
    pub const fn group_type(&self) -> SubtaskGroupType {
        self.group_type
    }

    /// Returns the group's tasks in insertion order.
    #[must_use]
    pub fn tasks(&self) -> &[QueuedSubtask] {
        &self.tasks
    }

    /// Returns the number of tasks in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the group has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Identity of the operation a queue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueScope {
    /// Tenant scope.
    pub tenant_id: TenantId,
    /// Cluster the operation targets.
    pub cluster_id: ClusterId,
    /// The top-level task owning every subtask record.
    pub parent_task_id: TaskId,
}

/// Execution settings for a queue run.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Upper bound on each subtask's execution time.
    pub subtask_timeout: Duration,
    /// Metrics sink.
    pub metrics: OrchestratorMetrics,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            subtask_timeout: Duration::from_secs(600),
            metrics: OrchestratorMetrics::new(),
        }
    }
}

/// Counts produced by a successful queue run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// Groups executed.
    pub groups: usize,
    /// Subtasks that ended in `Success`.
    pub succeeded: usize,
    /// Best-effort subtasks that ended in `Failure`.
    pub tolerated_failures: usize,
}

/// An ordered list of subtask groups for one lifecycle operation.
#[derive(Debug)]
pub struct SubtaskGroupQueue {
    scope: QueueScope,
    groups: Vec<SubtaskGroup>,
}

struct PlannedTask {
    id: TaskId,
    task_type: TaskType,
    subtask: Arc<dyn Subtask>,
    best_effort: bool,
}

struct PlannedGroup {
    name: String,
    group_type: SubtaskGroupType,
    parallelism: Option<NonZeroUsize>,
    tasks: Vec<PlannedTask>,
}

struct Executed {
    id: TaskId,
    task_type: TaskType,
    best_effort: bool,
    outcome: std::result::Result<(), String>,
}

#[derive(Default)]
struct GroupOutcome {
    succeeded: usize,
    tolerated_failures: usize,
    failure: Option<Executed>,
}

impl SubtaskGroupQueue {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new(scope: QueueScope) -> Self {
        Self {
            scope,
            groups: Vec::new(),
        }
    }

    /// Appends a group. Empty groups are dropped.
    pub fn add(&mut self, group: SubtaskGroup) {
        if group.is_empty() {
            tracing::debug!(group = %group.name, "skipping empty subtask group");
            return;
        }
        self.groups.push(group);
    }

    /// Returns the queue's scope.
    #[must_use]
    pub const fn scope(&self) -> &QueueScope {
        &self.scope
    }

    /// Returns the groups in execution order.
    #[must_use]
    pub fn groups(&self) -> &[SubtaskGroup] {
        &self.groups
    }

    /// Returns the total number of subtasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(SubtaskGroup::len).sum()
    }

    /// Runs every group in order.
    ///
    /// # Errors
    ///
    /// Returns `SubtaskFailure` for the first failing task that is not
    /// best-effort, or a storage error if a record could not be written.
    pub async fn run(self, store: &dyn TaskStore, options: &QueueOptions) -> Result<QueueReport> {
        let scope = self.scope;
        let planned = self.persist(store).await?;
        let mut report = QueueReport::default();

        let mut groups = planned.into_iter();
        while let Some(group) = groups.next() {
            let name = group.name.clone();
            let label = format!("{:?}", group.group_type);
            tracing::info!(
                task_id = %scope.parent_task_id,
                group = %name,
                tasks = group.tasks.len(),
                "running subtask group"
            );
            let outcome = {
                let _timer = TimingGuard::new(|d| options.metrics.observe_group_duration(&label, d));
                run_group(&scope, group, store, options).await
            };
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    let rest: Vec<PlannedTask> = groups.by_ref().flat_map(|g| g.tasks).collect();
                    if let Err(abort_err) = abort_all(store, &rest, options).await {
                        tracing::warn!(error = %abort_err, "could not abort every remaining subtask");
                    }
                    return Err(err);
                }
            };
            report.groups += 1;
            report.succeeded += outcome.succeeded;
            report.tolerated_failures += outcome.tolerated_failures;

            if let Some(failed) = outcome.failure {
                let rest: Vec<PlannedTask> = groups.by_ref().flat_map(|g| g.tasks).collect();
                let aborted = abort_all(store, &rest, options).await?;
                let message = failed.outcome.err().unwrap_or_default();
                tracing::error!(
                    task_id = %scope.parent_task_id,
                    group = %name,
                    subtask_id = %failed.id,
                    subtask_type = %failed.task_type,
                    aborted,
                    error = %message,
                    "subtask group failed"
                );
                return Err(Error::SubtaskFailure {
                    task_id: failed.id,
                    task_type: failed.task_type.to_string(),
                    message,
                });
            }
        }

        Ok(report)
    }

    async fn persist(self, store: &dyn TaskStore) -> Result<Vec<PlannedGroup>> {
        let mut planned = Vec::with_capacity(self.groups.len());
        for (index, group) in self.groups.into_iter().enumerate() {
            let position = u32::try_from(index)
                .map_err(|_| Error::storage("subtask group position out of range"))?;
            let mut tasks = Vec::with_capacity(group.tasks.len());
            for queued in group.tasks {
                let task_type = queued.subtask.task_type();
                let info = TaskInfo::subtask(
                    self.scope.parent_task_id,
                    task_type,
                    position,
                    group.group_type,
                    queued.subtask.details(),
                );
                store.insert(&info).await?;
                tasks.push(PlannedTask {
                    id: info.id,
                    task_type,
                    subtask: queued.subtask,
                    best_effort: queued.best_effort,
                });
            }
            planned.push(PlannedGroup {
                name: group.name,
                group_type: group.group_type,
                parallelism: group.parallelism,
                tasks,
            });
        }
        Ok(planned)
    }
}

async fn run_group(
    scope: &QueueScope,
    group: PlannedGroup,
    store: &dyn TaskStore,
    options: &QueueOptions,
) -> Result<GroupOutcome> {
    let limit = group.parallelism.map_or(usize::MAX, NonZeroUsize::get);
    let mut pending = group.tasks.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut outcome = GroupOutcome::default();
    let mut storage_error = None;

    loop {
        while outcome.failure.is_none() && storage_error.is_none() && in_flight.len() < limit {
            let Some(task) = pending.next() else {
                break;
            };
            in_flight.push(execute(scope, task, store, options));
        }

        let Some(executed) = in_flight.next().await else {
            break;
        };
        let executed = match executed {
            Ok(executed) => executed,
            Err(err) => {
                storage_error.get_or_insert(err);
                continue;
            }
        };
        match &executed.outcome {
            Ok(()) => outcome.succeeded += 1,
            Err(message) if executed.best_effort => {
                tracing::warn!(
                    subtask_id = %executed.id,
                    subtask_type = %executed.task_type,
                    error = %message,
                    "best-effort subtask failed, continuing"
                );
                outcome.tolerated_failures += 1;
            }
            Err(_) => {
                if outcome.failure.is_none() {
                    outcome.failure = Some(executed);
                }
            }
        }
    }

    let aborted = abort_all(store, pending.as_slice(), options).await;
    if let Some(err) = storage_error {
        return Err(err);
    }
    aborted?;
    Ok(outcome)
}

async fn execute(
    scope: &QueueScope,
    task: PlannedTask,
    store: &dyn TaskStore,
    options: &QueueOptions,
) -> Result<Executed> {
    if let Err(err) = transition(store, &task, TaskState::Created, TaskState::Running, None, options).await {
        if let Err(abort_err) = abort(store, &task, options).await {
            tracing::warn!(subtask_id = %task.id, error = %abort_err, "failed to abort subtask");
        }
        return Err(err);
    }

    let ctx = SubtaskContext {
        tenant_id: scope.tenant_id,
        cluster_id: scope.cluster_id,
        parent_task_id: scope.parent_task_id,
        subtask_id: task.id,
    };
    let run = AssertUnwindSafe(task.subtask.run(&ctx)).catch_unwind();
    let outcome = match tokio::time::timeout(options.subtask_timeout, run).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(err.to_string()),
        Ok(Err(panic)) => Err(panic_message(panic.as_ref())),
        Err(_) => Err(format!("timed out after {:?}", options.subtask_timeout)),
    };

    let (target, message) = match &outcome {
        Ok(()) => (TaskState::Success, None),
        Err(message) => (TaskState::Failure, Some(message.clone())),
    };
    transition(store, &task, TaskState::Running, target, message, options).await?;

    Ok(Executed {
        id: task.id,
        task_type: task.task_type,
        best_effort: task.best_effort,
        outcome,
    })
}

async fn abort(store: &dyn TaskStore, task: &PlannedTask, options: &QueueOptions) -> Result<()> {
    transition(store, task, TaskState::Created, TaskState::Aborted, None, options).await
}

/// Aborts every task, continuing past failures; returns the first failure.
async fn abort_all(store: &dyn TaskStore, tasks: &[PlannedTask], options: &QueueOptions) -> Result<usize> {
    let mut aborted = 0;
    let mut first_error = None;
    for task in tasks {
        match abort(store, task, options).await {
            Ok(()) => aborted += 1,
            Err(err) => {
                tracing::warn!(subtask_id = %task.id, error = %err, "failed to abort subtask");
                first_error.get_or_insert(err);
            }
        }
    }
    first_error.map_or(Ok(aborted), Err)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("subtask panicked: {detail}")
}

async fn transition(
    store: &dyn TaskStore,
    task: &PlannedTask,
    expected: TaskState,
    target: TaskState,
    message: Option<String>,
    options: &QueueOptions,
) -> Result<()> {
    match store.cas_state(&task.id, expected, target, message).await? {
        CasResult::Success => {
            options
                .metrics
                .record_task_transition(&task.task_type.to_string(), target.as_label());
            Ok(())
        }
        CasResult::NotFound => Err(Error::TaskNotFound { task_id: task.id }),
        CasResult::StateMismatch { actual } => Err(Error::InvalidStateTransition {
            from: actual.to_string(),
            to: target.to_string(),
            reason: format!("subtask {} expected {expected}", task.id),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryTaskStore;
    use crate::subtask::{FailingSubtask, NoOpSubtask};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubtask {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Subtask for CountingSubtask {
        fn task_type(&self) -> TaskType {
            TaskType::ServerControl
        }

        async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowSubtask;

    #[async_trait]
    impl Subtask for SlowSubtask {
        fn task_type(&self) -> TaskType {
            TaskType::DestroyServer
        }

        async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct PanickingSubtask;

    #[async_trait]
    impl Subtask for PanickingSubtask {
        fn task_type(&self) -> TaskType {
            TaskType::ServerControl
        }

        async fn run(&self, _ctx: &SubtaskContext) -> Result<()> {
            panic!("agent connection reset");
        }
    }

    /// Refuses to record any task as `Success`.
    struct NoSuccessStore {
        inner: InMemoryTaskStore,
    }

    #[async_trait]
    impl TaskStore for NoSuccessStore {
        async fn insert(&self, task: &TaskInfo) -> Result<()> {
            self.inner.insert(task).await
        }

        async fn get(&self, task_id: &TaskId) -> Result<Option<TaskInfo>> {
            self.inner.get(task_id).await
        }

        async fn cas_state(
            &self,
            task_id: &TaskId,
            expected: TaskState,
            target: TaskState,
            error_message: Option<String>,
        ) -> Result<CasResult> {
            if target == TaskState::Success {
                return Err(Error::storage("task table unavailable"));
            }
            self.inner.cas_state(task_id, expected, target, error_message).await
        }

        async fn subtasks(&self, parent_id: &TaskId) -> Result<Vec<TaskInfo>> {
            self.inner.subtasks(parent_id).await
        }
    }

    fn scope() -> QueueScope {
        QueueScope {
            tenant_id: TenantId::generate(),
            cluster_id: ClusterId::generate(),
            parent_task_id: TaskId::generate(),
        }
    }

    async fn states(store: &InMemoryTaskStore, parent: &TaskId) -> Result<Vec<(u32, TaskState)>> {
        Ok(store
            .subtasks(parent)
            .await?
            .into_iter()
            .map(|t| (t.position, t.state))
            .collect())
    }

    #[tokio::test]
    async fn all_groups_succeed_in_order() -> Result<()> {
        let store = InMemoryTaskStore::new();
        let scope = scope();
        let mut queue = SubtaskGroupQueue::new(scope);

        let mut first = SubtaskGroup::new("stop", SubtaskGroupType::StoppingNodeProcesses);
        first.push(NoOpSubtask::new(TaskType::ServerControl));
        first.push(NoOpSubtask::new(TaskType::ServerControl));
        let mut second = SubtaskGroup::new("destroy", SubtaskGroupType::RemovingUnusedServers);
        second.push(NoOpSubtask::new(TaskType::DestroyServer));
        queue.add(first);
        queue.add(second);
        assert_eq!(queue.task_count(), 3);

        let report = queue.run(&store, &QueueOptions::default()).await?;
        assert_eq!(report.groups, 2);
        assert_eq!(report.succeeded, 3);
        assert_eq!(
            states(&store, &scope.parent_task_id).await?,
            vec![
                (0, TaskState::Success),
                (0, TaskState::Success),
                (1, TaskState::Success)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn failure_aborts_later_groups() -> Result<()> {
        let store = InMemoryTaskStore::new();
        let scope = scope();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut queue = SubtaskGroupQueue::new(scope);

        let mut first = SubtaskGroup::new("destroy", SubtaskGroupType::RemovingUnusedServers);
        first.push(FailingSubtask::new(TaskType::DestroyServer, "instance stuck"));
        let mut second = SubtaskGroup::new("cleanup", SubtaskGroupType::RemovingUnusedServers);
        second.push(CountingSubtask { runs: runs.clone() });
        second.push(CountingSubtask { runs: runs.clone() });
        queue.add(first);
        queue.add(second);

        let err = queue.run(&store, &QueueOptions::default()).await;
        match err {
            Err(Error::SubtaskFailure { message, .. }) => assert!(message.contains("instance stuck")),
            other => panic!("expected SubtaskFailure, got {other:?}"),
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            states(&store, &scope.parent_task_id).await?,
            vec![
                (0, TaskState::Failure),
                (1, TaskState::Aborted),
                (1, TaskState::Aborted)
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_failure_does_not_fail_group() -> Result<()> {
        let store = InMemoryTaskStore::new();
        let scope = scope();
        let mut queue = SubtaskGroupQueue::new(scope);

        let mut group = SubtaskGroup::new("dns", SubtaskGroupType::RemovingUnusedServers);
        group.push_best_effort(FailingSubtask::new(TaskType::DnsManipulation, "no zone"));
        let mut next = SubtaskGroup::new("entry", SubtaskGroupType::RemovingUnusedServers);
        next.push(NoOpSubtask::new(TaskType::RemoveUniverseEntry));
        queue.add(group);
        queue.add(next);

        let report = queue.run(&store, &QueueOptions::default()).await?;
        assert_eq!(report.tolerated_failures, 1);
        assert_eq!(report.succeeded, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unlaunched_siblings_are_aborted() -> Result<()> {
        let store = InMemoryTaskStore::new();
        let scope = scope();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut queue = SubtaskGroupQueue::new(scope);

        let mut group = SubtaskGroup::new("backup", SubtaskGroupType::CreatingTableBackup)
            .with_parallelism(NonZeroUsize::MIN);
        group.push(FailingSubtask::new(TaskType::BackupTable, "snapshot failed"));
        group.push(CountingSubtask { runs: runs.clone() });
        queue.add(group);

        assert!(queue.run(&store, &QueueOptions::default()).await.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            states(&store, &scope.parent_task_id).await?,
            vec![(0, TaskState::Failure), (0, TaskState::Aborted)]
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_failure() -> Result<()> {
        let store = InMemoryTaskStore::new();
        let scope = scope();
        let mut queue = SubtaskGroupQueue::new(scope);
        let mut group = SubtaskGroup::new("destroy", SubtaskGroupType::RemovingUnusedServers);
        group.push(SlowSubtask);
        queue.add(group);

        let options = QueueOptions {
            subtask_timeout: Duration::from_secs(1),
            ..QueueOptions::default()
        };
        let err = queue.run(&store, &options).await;
        assert!(matches!(err, Err(Error::SubtaskFailure { ref message, .. }) if message.contains("timed out")));
        Ok(())
    }

    #[tokio::test]
    async fn panicking_subtask_fails_and_aborts_the_rest() -> Result<()> {
        let store = InMemoryTaskStore::new();
        let scope = scope();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut queue = SubtaskGroupQueue::new(scope);

        let mut first = SubtaskGroup::new("stop", SubtaskGroupType::StoppingNodeProcesses);
        first.push(PanickingSubtask);
        let mut second = SubtaskGroup::new("destroy", SubtaskGroupType::RemovingUnusedServers);
        second.push(CountingSubtask { runs: runs.clone() });
        queue.add(first);
        queue.add(second);

        let err = queue.run(&store, &QueueOptions::default()).await;
        assert!(matches!(
            err,
            Err(Error::SubtaskFailure { ref message, .. })
                if message == "subtask panicked: agent connection reset"
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        let subtasks = store.subtasks(&scope.parent_task_id).await?;
        assert!(subtasks.iter().all(|t| t.state.is_terminal()));
        assert_eq!(
            states(&store, &scope.parent_task_id).await?,
            vec![(0, TaskState::Failure), (1, TaskState::Aborted)]
        );
        assert!(subtasks[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("agent connection reset")));
        Ok(())
    }

    #[tokio::test]
    async fn storage_error_still_aborts_later_groups() -> Result<()> {
        let store = NoSuccessStore {
            inner: InMemoryTaskStore::new(),
        };
        let scope = scope();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut queue = SubtaskGroupQueue::new(scope);

        let mut first = SubtaskGroup::new("stop", SubtaskGroupType::StoppingNodeProcesses);
        first.push(NoOpSubtask::new(TaskType::ServerControl));
        let mut second = SubtaskGroup::new("destroy", SubtaskGroupType::RemovingUnusedServers);
        second.push(CountingSubtask { runs: runs.clone() });
        second.push(CountingSubtask { runs: runs.clone() });
        queue.add(first);
        queue.add(second);

        let err = queue.run(&store, &QueueOptions::default()).await;
        assert!(matches!(err, Err(Error::Storage { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            states(&store.inner, &scope.parent_task_id).await?,
            vec![
                (0, TaskState::Running),
                (1, TaskState::Aborted),
                (1, TaskState::Aborted)
            ]
        );
        Ok(())
    }

    #[test]
    fn empty_groups_are_dropped() {
        let mut queue = SubtaskGroupQueue::new(scope());
        queue.add(SubtaskGroup::new("dns", SubtaskGroupType::RemovingUnusedServers));
        assert!(queue.groups().is_empty());
    }
}
