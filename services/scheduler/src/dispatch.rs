//! Event fan-out: routes inbound cluster events to the component sinks.
//!
//! The transport that produces [`ClusterEvent`]s (bus, gRPC stream, test
//! harness) is out of scope; this adapter turns each event into plain
//! method calls on the interested components.

use std::sync::Arc;

use capstan_events::ClusterEvent;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::groups::TaskGroups;
use crate::offers::OfferQueue;
use crate::scheduler::TaskSchedulerImpl;

/// Fans cluster events out to the offer queue, task groups, and the
/// placement engine's reservation cache.
pub struct EventDispatcher {
    offer_queue: Arc<OfferQueue>,
    task_groups: Arc<TaskGroups>,
    task_scheduler: Arc<TaskSchedulerImpl>,
}

impl EventDispatcher {
    pub fn new(
        offer_queue: Arc<OfferQueue>,
        task_groups: Arc<TaskGroups>,
        task_scheduler: Arc<TaskSchedulerImpl>,
    ) -> Self {
        Self {
            offer_queue,
            task_groups,
            task_scheduler,
        }
    }

    /// Deliver one event to every interested sink.
    pub async fn handle(&self, event: &ClusterEvent) {
        debug!(event_type = event.event_type(), "Dispatching event");
        match event {
            ClusterEvent::TaskStateChange(change) => {
                // Reservation hygiene first, so an attempt racing this
                // event cannot re-read a reservation for a task that just
                // left PENDING.
                self.task_scheduler.task_changed_state(change);
                self.task_groups.task_changed_state(change);
            }
            ClusterEvent::TasksDeleted(deleted) => {
                self.task_scheduler.tasks_deleted(deleted);
                self.task_groups.tasks_deleted(deleted);
            }
            ClusterEvent::HostMaintenanceStateChange(change) => {
                self.offer_queue.host_changed_state(change.status.clone()).await;
            }
        }
    }

    /// Drain events from a channel until it closes or shutdown is
    /// signaled.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ClusterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting event dispatcher");
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle(&event).await,
                        None => {
                            debug!("Event channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Event dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }
}
