//! Task and host model types shared across the scheduler.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use capstan_id::{HostId, OfferId, SlaveId, TaskId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Status Enums
// =============================================================================

/// Lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task exists in storage but has not been accepted by the scheduler.
    Init,
    /// Task is awaiting placement.
    Pending,
    /// Task has been matched with an offer and handed to the driver.
    Assigned,
    /// The worker host acknowledged the task and is starting it.
    Starting,
    /// Task is running.
    Running,
    /// Task ran to completion.
    Finished,
    /// Task exited abnormally.
    Failed,
    /// A kill was requested and is in flight.
    Killing,
    /// Task was killed.
    Killed,
    /// The system lost track of the task (e.g. launch failure).
    Lost,
}

impl TaskStatus {
    /// Returns true for statuses a task can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Finished | TaskStatus::Failed | TaskStatus::Killed | TaskStatus::Lost
        )
    }

    /// Returns true for statuses where the task occupies resources on a host.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Assigned
                | TaskStatus::Starting
                | TaskStatus::Running
                | TaskStatus::Killing
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Init => "init",
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Killing => "killing",
            TaskStatus::Killed => "killed",
            TaskStatus::Lost => "lost",
        };
        write!(f, "{}", s)
    }
}

/// Per-host maintenance lifecycle tag.
///
/// Offers from hosts deeper into maintenance are less preferred for
/// placement: `None < Scheduled < Draining < Drained`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceMode {
    /// No maintenance planned.
    #[default]
    None,
    /// Maintenance is scheduled for some future time.
    Scheduled,
    /// The host is actively being drained of tasks.
    Draining,
    /// The host is drained and should receive no new tasks.
    Drained,
}

impl MaintenanceMode {
    /// Placement preference rank; lower sorts first.
    pub fn preference(&self) -> u8 {
        match self {
            MaintenanceMode::None => 0,
            MaintenanceMode::Scheduled => 1,
            MaintenanceMode::Draining => 2,
            MaintenanceMode::Drained => 3,
        }
    }
}

impl std::fmt::Display for MaintenanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MaintenanceMode::None => "none",
            MaintenanceMode::Scheduled => "scheduled",
            MaintenanceMode::Draining => "draining",
            MaintenanceMode::Drained => "drained",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Job and Task Model
// =============================================================================

/// Identifies a job: the unit tasks are replicated under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    /// Owning role.
    pub role: String,
    /// Deployment environment (e.g. "prod", "staging").
    pub environment: String,
    /// Job name, unique within (role, environment).
    pub name: String,
}

impl JobKey {
    pub fn new(
        role: impl Into<String>,
        environment: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            environment: environment.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.role, self.environment, self.name)
    }
}

/// Resource vector carried by offers and requested by tasks.
///
/// Opaque to the scheduler core; only the assigner interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Resources {
    pub cpu: f64,
    pub ram_mb: u64,
    pub disk_mb: u64,
}

impl Resources {
    pub fn new(cpu: f64, ram_mb: u64, disk_mb: u64) -> Self {
        Self {
            cpu,
            ram_mb,
            disk_mb,
        }
    }

    /// Returns true if `self` can satisfy `request`.
    pub fn covers(&self, request: &Resources) -> bool {
        self.cpu >= request.cpu && self.ram_mb >= request.ram_mb && self.disk_mb >= request.disk_mb
    }
}

/// A placement constraint on a task (e.g. host or rack anti-affinity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Attribute name the constraint applies to.
    pub name: String,
    /// Acceptable values, kept sorted for deterministic fingerprints.
    pub values: Vec<String>,
    /// Invert the match.
    pub negated: bool,
}

/// The shape of a task: everything that determines whether two pending
/// tasks are interchangeable for scheduling purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub job: JobKey,
    pub resources: Resources,
    pub constraints: Vec<Constraint>,
}

impl TaskConfig {
    /// Deterministic fingerprint of the config.
    ///
    /// Tasks with equal fingerprints are fungible and share a task group.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        format!("sha256:{}", hex::encode(&digest[..16]))
    }
}

/// A task as read from the task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: TaskId,
    /// Replica index within the job.
    pub instance_index: u32,
    pub status: TaskStatus,
    pub config: TaskConfig,
    /// The slave the task is (or was) assigned to, once placed.
    pub slave_id: Option<SlaveId>,
    /// The host the task is (or was) assigned to, once placed.
    pub host: Option<HostId>,
    /// Human-readable reason for the most recent status change.
    pub status_message: Option<String>,
}

impl ScheduledTask {
    pub fn job(&self) -> &JobKey {
        &self.config.job
    }
}

// =============================================================================
// Resource Manager Vocabulary
// =============================================================================

/// A resource offer as delivered by the external resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOffer {
    pub id: OfferId,
    pub host: HostId,
    pub slave_id: SlaveId,
    pub resources: Resources,
}

/// The launch plan handed to the driver when a task is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub slave_id: SlaveId,
    /// Display name for the resource manager's UI.
    pub name: String,
    pub resources: Resources,
}

/// A host together with its current maintenance mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub host: HostId,
    pub mode: MaintenanceMode,
}

// =============================================================================
// Canonical JSON
// =============================================================================

/// Render a JSON value into `out` with object keys sorted and no
/// whitespace, so the fingerprint is independent of serializer field
/// order.
fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::String(s) => write_quoted(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&str, &Value> =
                map.iter().map(|(k, v)| (k.as_str(), v)).collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_quoted(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// Append `s` as a quoted JSON string literal.
fn write_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(role: &str, cpu: f64) -> TaskConfig {
        TaskConfig {
            job: JobKey::new(role, "prod", "web"),
            resources: Resources::new(cpu, 1024, 4096),
            constraints: vec![],
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(
            config("ads", 1.0).fingerprint(),
            config("ads", 1.0).fingerprint()
        );
    }

    #[test]
    fn test_fingerprint_differs_across_shapes() {
        assert_ne!(
            config("ads", 1.0).fingerprint(),
            config("ads", 2.0).fingerprint()
        );
        assert_ne!(
            config("ads", 1.0).fingerprint(),
            config("billing", 1.0).fingerprint()
        );
    }

    #[test]
    fn test_canonical_json_sorts_keys_and_escapes() {
        let value = serde_json::json!({"b": 1, "a": "line\n\"quote\""});
        let mut out = String::new();
        write_canonical(&value, &mut out);
        assert_eq!(out, "{\"a\":\"line\\n\\\"quote\\\"\",\"b\":1}");
    }

    #[test]
    fn test_maintenance_preference_order() {
        assert!(MaintenanceMode::None.preference() < MaintenanceMode::Scheduled.preference());
        assert!(MaintenanceMode::Scheduled.preference() < MaintenanceMode::Draining.preference());
        assert!(MaintenanceMode::Draining.preference() < MaintenanceMode::Drained.preference());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Lost.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_resources_covers() {
        let offer = Resources::new(4.0, 8192, 65536);
        assert!(offer.covers(&Resources::new(1.0, 1024, 4096)));
        assert!(!offer.covers(&Resources::new(8.0, 1024, 4096)));
    }
}
