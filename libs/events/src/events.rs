//! Inbound event definitions for the scheduler core.
//!
//! Each event corresponds to one sink method on a scheduler component;
//! the dispatch adapter fans a [`ClusterEvent`] out to every interested
//! component.

use serde::{Deserialize, Serialize};

use crate::{HostStatus, ScheduledTask, TaskStatus};

/// All event type names as constants.
pub mod event_types {
    pub const TASK_STATE_CHANGED: &str = "task.state_changed";
    pub const TASKS_DELETED: &str = "task.deleted";
    pub const HOST_MAINTENANCE_STATE_CHANGED: &str = "host.maintenance_state_changed";
}

/// A task moved to its current status.
///
/// `from` is `None` for tasks observed at startup in their current status
/// (no transition actually happened while we were watching).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStateChange {
    pub task: ScheduledTask,
    pub from: Option<TaskStatus>,
}

impl TaskStateChange {
    /// A live transition out of `from` into the task's current status.
    pub fn transition(task: ScheduledTask, from: TaskStatus) -> Self {
        Self {
            task,
            from: Some(from),
        }
    }

    /// A task observed in its current status at startup.
    pub fn initialized(task: ScheduledTask) -> Self {
        Self { task, from: None }
    }

    /// Returns true if this is a live transition rather than a startup
    /// observation.
    pub fn is_transition(&self) -> bool {
        self.from.is_some()
    }
}

/// Tasks removed from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksDeleted {
    pub tasks: Vec<ScheduledTask>,
}

impl TasksDeleted {
    pub fn new(tasks: Vec<ScheduledTask>) -> Self {
        Self { tasks }
    }
}

/// A host's maintenance mode changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMaintenanceStateChange {
    pub status: HostStatus,
}

impl HostMaintenanceStateChange {
    pub fn new(status: HostStatus) -> Self {
        Self { status }
    }
}

/// Union of the inbound events the scheduler core consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    TaskStateChange(TaskStateChange),
    TasksDeleted(TasksDeleted),
    HostMaintenanceStateChange(HostMaintenanceStateChange),
}

impl ClusterEvent {
    /// The event type name, for logging and routing.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClusterEvent::TaskStateChange(_) => event_types::TASK_STATE_CHANGED,
            ClusterEvent::TasksDeleted(_) => event_types::TASKS_DELETED,
            ClusterEvent::HostMaintenanceStateChange(_) => {
                event_types::HOST_MAINTENANCE_STATE_CHANGED
            }
        }
    }
}
