//! Task storage seams.
//!
//! The real task store lives outside this crate; the scheduler only needs
//! two narrow views of it: a read path for pending tasks and their job
//! siblings, and a compare-and-set state transition. [`MemTaskStore`]
//! implements both in memory for embedders without a durable store and for
//! tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use capstan_events::{JobKey, ScheduledTask, TaskStatus};
use capstan_id::TaskId;
use thiserror::Error;
use tracing::debug;

/// Errors from task store operations.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    /// A transient fault (lock timeout, replica failover). The caller may
    /// retry the whole attempt.
    #[error("transient storage fault: {0}")]
    Transient(String),

    /// The store rejected the operation outright.
    #[error("storage operation failed: {0}")]
    Failed(String),
}

impl StorageError {
    /// Returns true if retrying the attempt later is reasonable.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Read access to the task store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a single task by id.
    async fn fetch_task(&self, id: &TaskId) -> Result<Option<ScheduledTask>, StorageError>;

    /// Fetch every non-terminal task of a job, in stable (task id) order.
    async fn fetch_job_active(&self, job: &JobKey) -> Result<Vec<ScheduledTask>, StorageError>;
}

/// Write access to task status.
#[async_trait]
pub trait StateManager: Send + Sync {
    /// Transition a task to `new_status`.
    ///
    /// If `expected` is set, the transition only applies when the task is
    /// currently in that status. Returns whether a transition happened.
    async fn change_state(
        &self,
        id: &TaskId,
        expected: Option<TaskStatus>,
        new_status: TaskStatus,
        message: Option<&str>,
    ) -> Result<bool, StorageError>;
}

/// In-memory task store.
///
/// Keyed by task id in a `BTreeMap` so reads come back in stable order.
#[derive(Default)]
pub struct MemTaskStore {
    tasks: Mutex<BTreeMap<TaskId, ScheduledTask>>,
}

impl MemTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task.
    pub fn save_task(&self, task: ScheduledTask) {
        self.tasks
            .lock()
            .expect("task store lock poisoned")
            .insert(task.task_id.clone(), task);
    }

    /// Delete tasks by id; missing ids are ignored.
    pub fn delete_tasks<'a>(&self, ids: impl IntoIterator<Item = &'a TaskId>) {
        let mut tasks = self.tasks.lock().expect("task store lock poisoned");
        for id in ids {
            tasks.remove(id);
        }
    }

    /// Snapshot a task's current state.
    pub fn get(&self, id: &TaskId) -> Option<ScheduledTask> {
        self.tasks
            .lock()
            .expect("task store lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for MemTaskStore {
    async fn fetch_task(&self, id: &TaskId) -> Result<Option<ScheduledTask>, StorageError> {
        Ok(self
            .tasks
            .lock()
            .expect("task store lock poisoned")
            .get(id)
            .cloned())
    }

    async fn fetch_job_active(&self, job: &JobKey) -> Result<Vec<ScheduledTask>, StorageError> {
        Ok(self
            .tasks
            .lock()
            .expect("task store lock poisoned")
            .values()
            .filter(|t| t.job() == job && !t.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StateManager for MemTaskStore {
    async fn change_state(
        &self,
        id: &TaskId,
        expected: Option<TaskStatus>,
        new_status: TaskStatus,
        message: Option<&str>,
    ) -> Result<bool, StorageError> {
        let mut tasks = self.tasks.lock().expect("task store lock poisoned");
        let Some(task) = tasks.get_mut(id) else {
            return Ok(false);
        };
        if let Some(expected) = expected {
            if task.status != expected {
                debug!(
                    task_id = %id,
                    expected = %expected,
                    actual = %task.status,
                    "Skipping state change, task not in expected status"
                );
                return Ok(false);
            }
        }
        task.status = new_status;
        task.status_message = message.map(str::to_string);
        Ok(true)
    }
}
