//! Placement engine: matches one pending task against the held offers.
//!
//! `TaskGroups` decides *when* to attempt a task; this module decides
//! *where* it lands. An attempt reads the task, summarizes its running
//! job siblings for the assigner's constraint checks, scans the offer
//! queue, and either commits a launch or records a preemption reservation
//! for a later attempt.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use capstan_events::{ScheduledTask, TaskAssignment, TaskStateChange, TasksDeleted, TaskStatus};
use capstan_id::{HostId, SlaveId, TaskId};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::offers::{HostOffer, LaunchError, OfferAcceptor, OfferQueue};
use crate::stats::StatsProvider;
use crate::storage::{StateManager, StorageError, TaskStore};

/// Status message recorded when a matched task fails to launch.
pub const LAUNCH_FAILED_MSG: &str = "Unknown exception attempting to schedule task.";

/// Gauge name for the preemption reservation cache size.
pub const RESERVATIONS_CACHE_SIZE_STAT: &str = "reservations_cache_size";

/// Outcome of a single placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleResult {
    /// The task was placed, or no longer needs placing. The group drops it.
    Success,
    /// No placement was possible right now; retry after backoff.
    TryLater,
}

/// Resource fit and constraint evaluation.
///
/// On `Ok(Some(..))` the assigner has already committed the task's
/// PENDING→ASSIGNED transition and persisted the slave assignment in a
/// single storage mutation; the returned plan is what the driver launches.
#[async_trait]
pub trait Assigner: Send + Sync {
    async fn maybe_assign(
        &self,
        offer: &HostOffer,
        task: &ScheduledTask,
        job_state: &AttributeAggregate,
    ) -> Result<Option<TaskAssignment>, StorageError>;
}

/// Victim selection policy for preemption.
///
/// Returns the slave where room would appear if the chosen victim were
/// killed; the caller reserves that slave for the pending task.
#[async_trait]
pub trait Preemptor: Send + Sync {
    async fn find_preemption_slot_for(
        &self,
        task_id: &TaskId,
        job_state: &AttributeAggregate,
    ) -> Option<SlaveId>;
}

/// The placement engine seam used by `TaskGroups`.
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule(&self, task_id: &TaskId) -> ScheduleResult;
}

// =============================================================================
// Job State Aggregate
// =============================================================================

/// Summary of where a job's other tasks are running.
///
/// Input to the assigner's anti-affinity and value-limit constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeAggregate {
    host_counts: BTreeMap<HostId, u64>,
}

impl AttributeAggregate {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Aggregate the hosts of every active task in the iterator.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a ScheduledTask>) -> Self {
        let mut host_counts = BTreeMap::new();
        for task in tasks {
            if !task.status.is_active() {
                continue;
            }
            if let Some(host) = &task.host {
                *host_counts.entry(host.clone()).or_insert(0) += 1;
            }
        }
        Self { host_counts }
    }

    /// Active sibling tasks on the given host.
    pub fn count_on(&self, host: &HostId) -> u64 {
        self.host_counts.get(host).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.host_counts.is_empty()
    }
}

// =============================================================================
// Preemption Reservations
// =============================================================================

struct Reservation {
    slave_id: SlaveId,
    expires_at: Instant,
}

/// Bounded map of task → (slave, expiry) preemption reservations.
///
/// Expiry is lazy: stale entries are dropped whenever the cache is read.
#[derive(Default)]
struct ReservationCache {
    inner: Mutex<HashMap<TaskId, Reservation>>,
}

impl ReservationCache {
    fn reserve(&self, task_id: TaskId, slave_id: SlaveId, ttl: Duration) {
        let mut inner = self.inner.lock().expect("reservations lock poisoned");
        inner.insert(
            task_id,
            Reservation {
                slave_id,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// The slave reserved for this task, if the reservation is still live.
    fn slave_for(&self, task_id: &TaskId) -> Option<SlaveId> {
        let mut inner = self.inner.lock().expect("reservations lock poisoned");
        match inner.get(task_id) {
            Some(reservation) if reservation.expires_at > Instant::now() => {
                Some(reservation.slave_id.clone())
            }
            Some(_) => {
                inner.remove(task_id);
                None
            }
            None => None,
        }
    }

    /// True if a live reservation binds this slave to some other task.
    fn reserved_by_other(&self, slave_id: &SlaveId, task_id: &TaskId) -> bool {
        let mut inner = self.inner.lock().expect("reservations lock poisoned");
        let now = Instant::now();
        inner.retain(|_, r| r.expires_at > now);
        inner
            .iter()
            .any(|(owner, r)| r.slave_id == *slave_id && owner != task_id)
    }

    fn remove(&self, task_id: &TaskId) {
        self.inner
            .lock()
            .expect("reservations lock poisoned")
            .remove(task_id);
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("reservations lock poisoned").len()
    }
}

// =============================================================================
// Placement Engine
// =============================================================================

/// Production `TaskScheduler`.
pub struct TaskSchedulerImpl {
    storage: Arc<dyn TaskStore>,
    state_manager: Arc<dyn StateManager>,
    assigner: Arc<dyn Assigner>,
    offer_queue: Arc<OfferQueue>,
    preemptor: Arc<dyn Preemptor>,
    reservation_duration: Duration,
    reservations: Arc<ReservationCache>,
}

impl TaskSchedulerImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn TaskStore>,
        state_manager: Arc<dyn StateManager>,
        assigner: Arc<dyn Assigner>,
        offer_queue: Arc<OfferQueue>,
        preemptor: Arc<dyn Preemptor>,
        reservation_duration: Duration,
        stats: &dyn StatsProvider,
    ) -> Arc<Self> {
        let reservations = Arc::new(ReservationCache::default());
        let gauge = Arc::clone(&reservations);
        stats.make_gauge(
            RESERVATIONS_CACHE_SIZE_STAT,
            Box::new(move || gauge.len() as u64),
        );
        Arc::new(Self {
            storage,
            state_manager,
            assigner,
            offer_queue,
            preemptor,
            reservation_duration,
            reservations,
        })
    }

    /// Event sink: a task that left PENDING no longer needs its
    /// reservation.
    pub fn task_changed_state(&self, change: &TaskStateChange) {
        if change.task.status != TaskStatus::Pending {
            self.reservations.remove(&change.task.task_id);
        }
    }

    /// Event sink: deleted tasks release their reservations.
    pub fn tasks_deleted(&self, deleted: &TasksDeleted) {
        for task in &deleted.tasks {
            self.reservations.remove(&task.task_id);
        }
    }
}

/// Bridges the assigner into the offer queue scan, applying the
/// reservation overlay: a task holding a reservation only sees the
/// reserved slave's offer, and reserved slaves are invisible to everyone
/// else.
struct AssignmentAcceptor<'a> {
    assigner: &'a dyn Assigner,
    task: &'a ScheduledTask,
    job_state: &'a AttributeAggregate,
    reservations: &'a ReservationCache,
    reserved_slave: Option<SlaveId>,
}

#[async_trait]
impl<'a> OfferAcceptor for AssignmentAcceptor<'a> {
    async fn accept(&self, offer: &HostOffer) -> Result<Option<TaskAssignment>, StorageError> {
        match &self.reserved_slave {
            Some(slave_id) => {
                if offer.offer.slave_id != *slave_id {
                    return Ok(None);
                }
            }
            None => {
                if self
                    .reservations
                    .reserved_by_other(&offer.offer.slave_id, &self.task.task_id)
                {
                    return Ok(None);
                }
            }
        }
        self.assigner
            .maybe_assign(offer, self.task, self.job_state)
            .await
    }
}

#[async_trait]
impl TaskScheduler for TaskSchedulerImpl {
    async fn schedule(&self, task_id: &TaskId) -> ScheduleResult {
        let task = match self.storage.fetch_task(task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task fetch failed, will retry");
                return ScheduleResult::TryLater;
            }
        };
        let Some(task) = task.filter(|t| t.status == TaskStatus::Pending) else {
            debug!(task_id = %task_id, "Task no longer pending, dropping attempt");
            return ScheduleResult::Success;
        };

        let job_state = match self.storage.fetch_job_active(task.job()).await {
            Ok(siblings) => AttributeAggregate::from_tasks(
                siblings.iter().filter(|t| t.task_id != task.task_id),
            ),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Job state read failed, will retry");
                return ScheduleResult::TryLater;
            }
        };

        let acceptor = AssignmentAcceptor {
            assigner: self.assigner.as_ref(),
            task: &task,
            job_state: &job_state,
            reservations: self.reservations.as_ref(),
            reserved_slave: self.reservations.slave_for(task_id),
        };

        match self.offer_queue.launch_first(&acceptor).await {
            Ok(true) => {
                self.reservations.remove(task_id);
                ScheduleResult::Success
            }
            Ok(false) => {
                if let Some(slave_id) = self
                    .preemptor
                    .find_preemption_slot_for(task_id, &job_state)
                    .await
                {
                    info!(
                        task_id = %task_id,
                        slave_id = %slave_id,
                        ttl_secs = self.reservation_duration.as_secs(),
                        "Reserving preemption slot"
                    );
                    self.reservations.reserve(
                        task_id.clone(),
                        slave_id,
                        self.reservation_duration,
                    );
                }
                ScheduleResult::TryLater
            }
            Err(LaunchError::Acceptor(e)) if e.is_transient() => {
                warn!(task_id = %task_id, error = %e, "Transient fault during assignment, will retry");
                ScheduleResult::TryLater
            }
            Err(LaunchError::Acceptor(e)) => {
                error!(task_id = %task_id, error = %e, "Assignment failed, will retry");
                ScheduleResult::TryLater
            }
            Err(LaunchError::Driver(e)) => {
                error!(task_id = %task_id, error = %e, "Launch failed, marking task lost");
                if let Err(e) = self
                    .state_manager
                    .change_state(
                        task_id,
                        Some(TaskStatus::Pending),
                        TaskStatus::Lost,
                        Some(LAUNCH_FAILED_MSG),
                    )
                    .await
                {
                    error!(task_id = %task_id, error = %e, "Failed to mark task lost");
                }
                ScheduleResult::Success
            }
        }
    }
}
