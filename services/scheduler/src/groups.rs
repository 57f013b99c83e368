//! Task groups: decide *when* each group of fungible pending tasks gets a
//! placement attempt.
//!
//! Tasks that share a group key (job plus config fingerprint) are
//! interchangeable, so the group retries as a unit: one outstanding timer,
//! one attempt per fire, exponential backoff while nothing fits, and a
//! global token bucket so a large cluster-wide backlog cannot stampede
//! storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use capstan_events::{JobKey, ScheduledTask, TaskStateChange, TasksDeleted, TaskStatus};
use capstan_id::TaskId;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backoff::BackoffStrategy;
use crate::rate::RateLimiter;
use crate::scheduler::{ScheduleResult, TaskScheduler};

/// Startup delay policy for tasks observed already-PENDING at boot.
///
/// Lives outside this crate; typically spreads the restart backlog out so
/// the first reconciliation wave does not arrive all at once.
pub trait RescheduleCalculator: Send + Sync {
    fn startup_schedule_delay(&self, task: &ScheduledTask) -> Duration;
}

/// Groups tasks that are interchangeable for placement purposes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    job: JobKey,
    fingerprint: String,
}

impl GroupKey {
    pub fn of(task: &ScheduledTask) -> Self {
        Self {
            job: task.job().clone(),
            fingerprint: task.config.fingerprint(),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digest = self
            .fingerprint
            .strip_prefix("sha256:")
            .unwrap_or(&self.fingerprint);
        let short: String = digest.chars().take(8).collect();
        write!(f, "{}#{}", self.job, short)
    }
}

/// One group's retry state. Members keep insertion order so attempts are
/// deterministic.
struct TaskGroup {
    penalty: Duration,
    members: Vec<TaskId>,
    retry: Option<JoinHandle<()>>,
}

impl TaskGroup {
    fn new(penalty: Duration) -> Self {
        Self {
            penalty,
            members: Vec::new(),
            retry: None,
        }
    }

    fn add(&mut self, id: TaskId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    fn remove(&mut self, id: &TaskId) {
        self.members.retain(|member| member != id);
    }

    fn head(&self) -> Option<TaskId> {
        self.members.first().cloned()
    }
}

/// Scheduling-attempt driver for all task groups.
pub struct TaskGroups {
    first_schedule_delay: Duration,
    backoff: Arc<dyn BackoffStrategy>,
    rate_limiter: Arc<RateLimiter>,
    scheduler: Arc<dyn TaskScheduler>,
    reschedule_calculator: Arc<dyn RescheduleCalculator>,
    groups: Mutex<HashMap<GroupKey, TaskGroup>>,
}

impl TaskGroups {
    pub fn new(
        first_schedule_delay: Duration,
        backoff: Arc<dyn BackoffStrategy>,
        rate_limiter: Arc<RateLimiter>,
        scheduler: Arc<dyn TaskScheduler>,
        reschedule_calculator: Arc<dyn RescheduleCalculator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            first_schedule_delay,
            backoff,
            rate_limiter,
            scheduler,
            reschedule_calculator,
            groups: Mutex::new(HashMap::new()),
        })
    }

    /// Event sink: track tasks as they move into and out of PENDING.
    ///
    /// A task entering PENDING joins its group and, if the group has no
    /// retry outstanding, schedules one. Startup observations
    /// (`is_transition() == false`) use the reschedule calculator's delay
    /// instead of the first-schedule delay.
    pub fn task_changed_state(self: &Arc<Self>, change: &TaskStateChange) {
        let task = &change.task;
        if task.status == TaskStatus::Pending {
            let delay = if change.is_transition() {
                self.first_schedule_delay
            } else {
                self.reschedule_calculator.startup_schedule_delay(task)
            };
            let key = GroupKey::of(task);

            let mut groups = self.lock_groups();
            let group = groups
                .entry(key.clone())
                .or_insert_with(|| TaskGroup::new(delay));
            group.add(task.task_id.clone());
            if group.retry.is_none() {
                group.penalty = delay;
                debug!(
                    group = %key,
                    task_id = %task.task_id,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling first attempt for group"
                );
                group.retry = Some(self.spawn_attempt(key, delay));
            }
        } else if change.from == Some(TaskStatus::Pending) {
            self.remove_member(&GroupKey::of(task), &task.task_id);
        }
    }

    /// Event sink: deleted tasks leave their groups. Safe to deliver more
    /// than once.
    pub fn tasks_deleted(self: &Arc<Self>, deleted: &TasksDeleted) {
        for task in &deleted.tasks {
            self.remove_member(&GroupKey::of(task), &task.task_id);
        }
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.lock_groups().len()
    }

    /// Total tracked pending tasks across all groups.
    pub fn pending_task_count(&self) -> usize {
        self.lock_groups().values().map(|g| g.members.len()).sum()
    }

    fn remove_member(&self, key: &GroupKey, id: &TaskId) {
        let mut groups = self.lock_groups();
        if let Some(group) = groups.get_mut(key) {
            group.remove(id);
            if group.members.is_empty() && group.retry.is_none() {
                groups.remove(key);
            }
        }
    }

    fn spawn_attempt(self: &Arc<Self>, key: GroupKey, delay: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.run_attempt(key).await;
        })
    }

    /// One fire of a group's retry timer: attempt the group's first member.
    async fn run_attempt(self: &Arc<Self>, key: GroupKey) {
        // The group may have been collected since this attempt was
        // scheduled; a stale fire must be a no-op.
        let head = {
            let mut groups = self.lock_groups();
            let Some(group) = groups.get_mut(&key) else {
                return;
            };
            group.retry = None;
            match group.head() {
                Some(id) => id,
                None => {
                    groups.remove(&key);
                    debug!(group = %key, "Group empty, collected");
                    return;
                }
            }
        };

        self.rate_limiter.acquire().await;
        let result = self.scheduler.schedule(&head).await;

        let mut groups = self.lock_groups();
        let Some(group) = groups.get_mut(&key) else {
            return;
        };
        match result {
            ScheduleResult::Success => {
                group.remove(&head);
                group.penalty = self.first_schedule_delay;
            }
            ScheduleResult::TryLater => {
                group.penalty = self.backoff.calculate(group.penalty);
            }
        }
        if group.members.is_empty() {
            groups.remove(&key);
            debug!(group = %key, "Group drained, collected");
        } else if group.retry.is_none() {
            let delay = group.penalty;
            debug!(
                group = %key,
                result = ?result,
                delay_ms = delay.as_millis() as u64,
                "Scheduling retry for group"
            );
            group.retry = Some(self.spawn_attempt(key.clone(), delay));
        }
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<GroupKey, TaskGroup>> {
        self.groups.lock().expect("task groups lock poisoned")
    }
}
