//! Shared test doubles and wiring for scheduler integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use capstan_events::{
    ClusterEvent, HostMaintenanceStateChange, HostStatus, JobKey, MaintenanceMode, ResourceOffer,
    Resources, ScheduledTask, TaskAssignment, TaskConfig, TaskStateChange, TaskStatus,
    TasksDeleted,
};
use capstan_id::{HostId, OfferId, SlaveId, TaskId};
use capstan_scheduler::backoff::TruncatedBinaryBackoff;
use capstan_scheduler::config::SchedulerConfig;
use capstan_scheduler::dispatch::EventDispatcher;
use capstan_scheduler::driver::{Driver, DriverError};
use capstan_scheduler::groups::{RescheduleCalculator, TaskGroups};
use capstan_scheduler::offers::{
    HostOffer, MaintenanceController, OfferQueue, OfferReturnDelay,
};
use capstan_scheduler::rate::RateLimiter;
use capstan_scheduler::scheduler::{
    Assigner, AttributeAggregate, Preemptor, TaskScheduler, TaskSchedulerImpl,
};
use capstan_scheduler::stats::InMemoryStats;
use capstan_scheduler::storage::{MemTaskStore, StateManager, StorageError, TaskStore};

/// Install a fmt subscriber once per test binary so `RUST_LOG` works
/// when debugging a failing scenario.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,capstan_scheduler=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn task_id(s: &str) -> TaskId {
    TaskId::parse(s).unwrap()
}

pub fn offer_id(s: &str) -> OfferId {
    OfferId::parse(s).unwrap()
}

pub fn slave_id(s: &str) -> SlaveId {
    SlaveId::parse(s).unwrap()
}

pub fn host_id(s: &str) -> HostId {
    HostId::parse(s).unwrap()
}

pub fn task_with_status(id: &str, job: &str, status: TaskStatus) -> ScheduledTask {
    ScheduledTask {
        task_id: task_id(id),
        instance_index: 0,
        status,
        config: TaskConfig {
            job: JobKey::new("role", "prod", job),
            resources: Resources::new(1.0, 1024, 4096),
            constraints: vec![],
        },
        slave_id: None,
        host: None,
        status_message: None,
    }
}

pub fn pending_task(id: &str, job: &str) -> ScheduledTask {
    task_with_status(id, job, TaskStatus::Pending)
}

pub fn offer(id: &str, host: &str, slave: &str) -> ResourceOffer {
    ResourceOffer {
        id: offer_id(id),
        host: host_id(host),
        slave_id: slave_id(slave),
        resources: Resources::new(4.0, 8192, 65536),
    }
}

pub fn assignment_for(offer: &HostOffer, task: &ScheduledTask) -> TaskAssignment {
    TaskAssignment {
        task_id: task.task_id.clone(),
        slave_id: offer.offer.slave_id.clone(),
        name: format!("{}/{}", task.job(), task.task_id),
        resources: task.config.resources.clone(),
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Records launches and declines; launches can be made to fail.
#[derive(Default)]
pub struct RecordingDriver {
    launches: Mutex<Vec<(OfferId, TaskAssignment)>>,
    declines: Mutex<Vec<OfferId>>,
    fail_launches: AtomicBool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }

    pub fn launches(&self) -> Vec<(OfferId, TaskAssignment)> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launched_offer_ids(&self) -> Vec<OfferId> {
        self.launches()
            .into_iter()
            .map(|(offer_id, _)| offer_id)
            .collect()
    }

    pub fn launched_task_ids(&self) -> Vec<TaskId> {
        self.launches()
            .into_iter()
            .map(|(_, assignment)| assignment.task_id)
            .collect()
    }

    pub fn declines(&self) -> Vec<OfferId> {
        self.declines.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn launch_task(
        &self,
        offer_id: &OfferId,
        assignment: &TaskAssignment,
    ) -> Result<(), DriverError> {
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(DriverError::NotReady);
        }
        self.launches
            .lock()
            .unwrap()
            .push((offer_id.clone(), assignment.clone()));
        Ok(())
    }

    async fn decline_offer(&self, offer_id: &OfferId) -> Result<(), DriverError> {
        self.declines.lock().unwrap().push(offer_id.clone());
        Ok(())
    }
}

// =============================================================================
// Maintenance, Return Delay, Reschedule
// =============================================================================

/// Serves maintenance modes from a map, defaulting to `None`.
#[derive(Default)]
pub struct StaticMaintenance {
    modes: Mutex<HashMap<HostId, MaintenanceMode>>,
}

impl StaticMaintenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, host: &str, mode: MaintenanceMode) {
        self.modes.lock().unwrap().insert(host_id(host), mode);
    }
}

#[async_trait]
impl MaintenanceController for StaticMaintenance {
    async fn get_mode(&self, host: &HostId) -> MaintenanceMode {
        self.modes
            .lock()
            .unwrap()
            .get(host)
            .copied()
            .unwrap_or_default()
    }
}

pub struct FixedReturnDelay(pub Duration);

impl OfferReturnDelay for FixedReturnDelay {
    fn get(&self) -> Duration {
        self.0
    }
}

pub struct FixedReschedule(pub Duration);

impl RescheduleCalculator for FixedReschedule {
    fn startup_schedule_delay(&self, _task: &ScheduledTask) -> Duration {
        self.0
    }
}

// =============================================================================
// Assigners
// =============================================================================

pub enum ScriptedResponse {
    Absent,
    Assign,
    Fail,
}

/// Replays a scripted sequence of responses, one per `maybe_assign` call;
/// anything past the script is `Absent`.
#[derive(Default)]
pub struct ScriptedAssigner {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<(OfferId, TaskId)>>,
}

impl ScriptedAssigner {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(OfferId, TaskId)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assigner for ScriptedAssigner {
    async fn maybe_assign(
        &self,
        offer: &HostOffer,
        task: &ScheduledTask,
        _job_state: &AttributeAggregate,
    ) -> Result<Option<TaskAssignment>, StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push((offer.offer.id.clone(), task.task_id.clone()));
        match self.script.lock().unwrap().pop_front() {
            None | Some(ScriptedResponse::Absent) => Ok(None),
            Some(ScriptedResponse::Assign) => Ok(Some(assignment_for(offer, task))),
            Some(ScriptedResponse::Fail) => {
                Err(StorageError::Transient("injected failure".to_string()))
            }
        }
    }
}

/// Assigns whenever the offer covers the task's resource request, and
/// commits the ASSIGNED transition to the backing store the way a real
/// assigner would.
pub struct FitAssigner {
    store: Arc<MemTaskStore>,
}

impl FitAssigner {
    pub fn new(store: Arc<MemTaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Assigner for FitAssigner {
    async fn maybe_assign(
        &self,
        offer: &HostOffer,
        task: &ScheduledTask,
        _job_state: &AttributeAggregate,
    ) -> Result<Option<TaskAssignment>, StorageError> {
        if !offer.offer.resources.covers(&task.config.resources) {
            return Ok(None);
        }
        if let Some(mut stored) = self.store.get(&task.task_id) {
            stored.status = TaskStatus::Assigned;
            stored.slave_id = Some(offer.offer.slave_id.clone());
            stored.host = Some(offer.offer.host.clone());
            self.store.save_task(stored);
        }
        Ok(Some(assignment_for(offer, task)))
    }
}

// =============================================================================
// Preemptor
// =============================================================================

/// Returns a configured slot (or none) and records every consultation.
#[derive(Default)]
pub struct StubPreemptor {
    slot: Mutex<Option<SlaveId>>,
    calls: Mutex<Vec<TaskId>>,
}

impl StubPreemptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_slot(&self, slave: Option<SlaveId>) {
        *self.slot.lock().unwrap() = slave;
    }

    pub fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Preemptor for StubPreemptor {
    async fn find_preemption_slot_for(
        &self,
        task_id: &TaskId,
        _job_state: &AttributeAggregate,
    ) -> Option<SlaveId> {
        self.calls.lock().unwrap().push(task_id.clone());
        self.slot.lock().unwrap().clone()
    }
}

// =============================================================================
// State Manager
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeCall {
    pub task_id: TaskId,
    pub expected: Option<TaskStatus>,
    pub new_status: TaskStatus,
    pub message: Option<String>,
}

/// Forwards to the in-memory store while recording every call.
pub struct RecordingStateManager {
    inner: Arc<MemTaskStore>,
    calls: Mutex<Vec<StateChangeCall>>,
}

impl RecordingStateManager {
    pub fn new(inner: Arc<MemTaskStore>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<StateChangeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateManager for RecordingStateManager {
    async fn change_state(
        &self,
        id: &TaskId,
        expected: Option<TaskStatus>,
        new_status: TaskStatus,
        message: Option<&str>,
    ) -> Result<bool, StorageError> {
        self.calls.lock().unwrap().push(StateChangeCall {
            task_id: id.clone(),
            expected,
            new_status,
            message: message.map(str::to_string),
        });
        self.inner.change_state(id, expected, new_status, message).await
    }
}

// =============================================================================
// Cluster Wiring
// =============================================================================

/// Test configuration matching the scheduling scenarios: 1 ms first
/// attempt, truncated binary backoff from 10 ms, and a 10 ms offer hold
/// unless overridden.
pub struct TestCluster {
    pub driver: Arc<RecordingDriver>,
    pub maintenance: Arc<StaticMaintenance>,
    pub store: Arc<MemTaskStore>,
    pub state_manager: Arc<RecordingStateManager>,
    pub preemptor: Arc<StubPreemptor>,
    pub stats: Arc<InMemoryStats>,
    pub offer_queue: Arc<OfferQueue>,
    pub groups: Arc<TaskGroups>,
    pub scheduler: Arc<TaskSchedulerImpl>,
    pub dispatcher: Arc<EventDispatcher>,
}

impl TestCluster {
    pub fn new(assigner: Arc<dyn Assigner>) -> Self {
        Self::with_offer_hold(assigner, Duration::from_millis(10))
    }

    pub fn with_offer_hold(assigner: Arc<dyn Assigner>, hold: Duration) -> Self {
        Self::build(|_| assigner, hold)
    }

    /// A cluster whose assigner places any task that fits, committing the
    /// ASSIGNED transition to the cluster's own store.
    pub fn with_fit_assigner(hold: Duration) -> Self {
        Self::build(
            |store| Arc::new(FitAssigner::new(store)) as Arc<dyn Assigner>,
            hold,
        )
    }

    fn build(
        make_assigner: impl FnOnce(Arc<MemTaskStore>) -> Arc<dyn Assigner>,
        hold: Duration,
    ) -> Self {
        init_tracing();

        // Defaults give the timings the scenarios assume: 1 ms first
        // attempt, 60 s reservations, 100 attempts/s.
        let config = SchedulerConfig::default();

        let driver = Arc::new(RecordingDriver::new());
        let maintenance = Arc::new(StaticMaintenance::new());
        let store = Arc::new(MemTaskStore::new());
        let assigner = make_assigner(Arc::clone(&store));
        let state_manager = Arc::new(RecordingStateManager::new(Arc::clone(&store)));
        let preemptor = Arc::new(StubPreemptor::new());
        let stats = Arc::new(InMemoryStats::new());

        let offer_queue = OfferQueue::new(
            Arc::clone(&driver) as Arc<dyn Driver>,
            Arc::new(FixedReturnDelay(hold)),
            Arc::clone(&maintenance) as Arc<dyn MaintenanceController>,
        );
        let scheduler = TaskSchedulerImpl::new(
            Arc::clone(&store) as Arc<dyn TaskStore>,
            Arc::clone(&state_manager) as Arc<dyn StateManager>,
            assigner,
            Arc::clone(&offer_queue),
            Arc::clone(&preemptor) as Arc<dyn Preemptor>,
            config.reservation_duration,
            stats.as_ref(),
        );
        let groups = TaskGroups::new(
            config.first_schedule_delay,
            Arc::new(TruncatedBinaryBackoff::new(
                Duration::from_millis(10),
                Duration::from_millis(100),
            )),
            Arc::new(RateLimiter::new(config.rate_limit)),
            Arc::clone(&scheduler) as Arc<dyn TaskScheduler>,
            Arc::new(FixedReschedule(Duration::from_millis(10))),
        );
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&offer_queue),
            Arc::clone(&groups),
            Arc::clone(&scheduler),
        ));

        Self {
            driver,
            maintenance,
            store,
            state_manager,
            preemptor,
            stats,
            offer_queue,
            groups,
            scheduler,
            dispatcher,
        }
    }

    pub async fn add_offer(&self, offer: ResourceOffer) {
        self.offer_queue.add_offer(offer).await;
    }

    /// Persist the task in its new status (if not already stored) and
    /// deliver the transition event.
    pub async fn change_state(&self, task: &ScheduledTask, from: TaskStatus, to: TaskStatus) {
        let mut updated = task.clone();
        updated.status = to;
        if self.store.get(&task.task_id).is_none() {
            self.store.save_task(updated.clone());
        }
        self.dispatcher
            .handle(&ClusterEvent::TaskStateChange(TaskStateChange::transition(
                updated, from,
            )))
            .await;
    }

    /// Persist the task (if not already stored) and deliver a startup
    /// observation event.
    pub async fn initialized(&self, task: &ScheduledTask) {
        if self.store.get(&task.task_id).is_none() {
            self.store.save_task(task.clone());
        }
        self.dispatcher
            .handle(&ClusterEvent::TaskStateChange(TaskStateChange::initialized(
                task.clone(),
            )))
            .await;
    }

    /// Delete from storage and deliver the deletion event.
    pub async fn delete_tasks(&self, tasks: &[ScheduledTask]) {
        self.store
            .delete_tasks(tasks.iter().map(|t| &t.task_id));
        self.dispatcher
            .handle(&ClusterEvent::TasksDeleted(TasksDeleted::new(
                tasks.to_vec(),
            )))
            .await;
    }

    pub async fn host_changed(&self, host: &str, mode: MaintenanceMode) {
        self.dispatcher
            .handle(&ClusterEvent::HostMaintenanceStateChange(
                HostMaintenanceStateChange::new(HostStatus {
                    host: host_id(host),
                    mode,
                }),
            ))
            .await;
    }
}
