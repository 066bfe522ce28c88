//! In-memory task store.
//!
//! ## Limitations
//!
//! - **No durability**: All state is lost when the process exits
//! - **Single-process only**: State is not shared across process boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use unimgr_core::TaskId;

use super::{CasResult, TaskStore};
use crate::error::{Error, Result};
use crate::task::{TaskInfo, TaskState};

/// In-memory task store.
///
/// ## Example
///
/// ```rust
/// use unimgr_flow::store::memory::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert_eq!(store.task_count().unwrap_or_default(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, TaskInfo>,
    // Children in insertion order.
    children: HashMap<TaskId, Vec<TaskId>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn task_count(&self) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.tasks.len()
        };
        Ok(count)
    }

    /// Returns the number of records in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn count_in_state(&self, state: TaskState) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.tasks.values().filter(|t| t.state == state).count()
        };
        Ok(count)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &TaskInfo) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        if inner.tasks.contains_key(&task.id) {
            drop(inner);
            return Err(Error::storage(format!("task {} already exists", task.id)));
        }
        if let Some(parent) = task.parent_id {
            inner.children.entry(parent).or_default().push(task.id);
        }
        inner.tasks.insert(task.id, task.clone());
        drop(inner);
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskInfo>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.tasks.get(task_id).cloned()
        };
        Ok(result)
    }

    async fn cas_state(
        &self,
        task_id: &TaskId,
        expected: TaskState,
        target: TaskState,
        error_message: Option<String>,
    ) -> Result<CasResult> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let Some(task) = inner.tasks.get_mut(task_id) else {
            drop(inner);
            return Ok(CasResult::NotFound);
        };

        if task.state != expected {
            let actual = task.state;
            drop(inner);
            return Ok(CasResult::StateMismatch { actual });
        }

        let transition = if target.is_terminal() {
            task.try_terminal_transition(target, error_message).map(|_| ())
        } else {
            task.transition_to(target)
        };
        drop(inner);
        transition.map(|()| CasResult::Success)
    }

    async fn subtasks(&self, parent_id: &TaskId) -> Result<Vec<TaskInfo>> {
        let mut result: Vec<TaskInfo> = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .children
                .get(parent_id)
                .map(|ids| ids.iter().filter_map(|id| inner.tasks.get(id).cloned()).collect())
                .unwrap_or_default()
        };
        // Stable sort keeps insertion order within a position.
        result.sort_by_key(|t| t.position);
        Ok(result)
    }
}
