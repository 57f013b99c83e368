//! Offer queue: holds resource offers until they are matched or returned.
//!
//! Offers arrive from the resource manager, get annotated with their host's
//! maintenance mode, and are held for a bounded time. The placement engine
//! scans held offers in maintenance-preference order through
//! [`OfferQueue::launch_first`]; anything unmatched is declined back to the
//! manager when its hold timer fires.
//!
//! # Invariants
//!
//! - At most one offer is held per slave; a duplicate causes both offers
//!   to be declined immediately
//! - Offers are visited in ascending maintenance preference, tie-broken
//!   by arrival order
//! - A consumed offer is never declined; a declined offer is never launched

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capstan_events::{HostStatus, MaintenanceMode, ResourceOffer, TaskAssignment};
use capstan_id::{HostId, OfferId, SlaveId};
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverError};
use crate::storage::StorageError;

/// How long to hold an offer before returning it.
///
/// Queried once per offer, so implementations may jitter.
pub trait OfferReturnDelay: Send + Sync {
    fn get(&self) -> Duration;
}

/// Base hold time plus uniform random jitter, so offers received in a
/// burst do not all expire in the same instant.
pub struct RandomJitterReturnDelay {
    base: Duration,
    max_jitter: Duration,
}

impl RandomJitterReturnDelay {
    pub fn new(base: Duration, max_jitter: Duration) -> Self {
        Self { base, max_jitter }
    }
}

impl OfferReturnDelay for RandomJitterReturnDelay {
    fn get(&self) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base;
        }
        self.base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Per-host maintenance mode lookup.
#[async_trait]
pub trait MaintenanceController: Send + Sync {
    async fn get_mode(&self, host: &HostId) -> MaintenanceMode;
}

/// An offer annotated with its host's maintenance mode.
#[derive(Debug, Clone)]
pub struct HostOffer {
    pub offer: ResourceOffer,
    pub mode: MaintenanceMode,
    pub received_at: DateTime<Utc>,
}

/// Errors from a launch attempt against the queue.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The driver rejected the launch. The offer has already been removed
    /// from the queue and is not re-inserted.
    #[error("launch failed: {0}")]
    Driver(#[from] DriverError),

    /// The acceptor failed before any offer was consumed.
    #[error(transparent)]
    Acceptor(#[from] StorageError),
}

/// Decides whether an offer yields a launch plan for some task.
///
/// Supplied per `launch_first` call rather than stored, so the queue and
/// the placement engine do not hold references to each other.
#[async_trait]
pub trait OfferAcceptor: Send + Sync {
    async fn accept(&self, offer: &HostOffer) -> Result<Option<TaskAssignment>, StorageError>;
}

/// Ordering key: maintenance preference first, then arrival sequence.
type OfferKey = (u8, u64);

#[derive(Default)]
struct QueueState {
    offers: BTreeMap<OfferKey, HostOffer>,
    by_id: HashMap<OfferId, OfferKey>,
    by_slave: HashMap<SlaveId, OfferId>,
    timers: HashMap<OfferId, JoinHandle<()>>,
    next_seq: u64,
}

impl QueueState {
    /// Remove an offer and cancel its hold timer. No-op if the offer is
    /// no longer held.
    fn remove(&mut self, id: &OfferId) -> Option<HostOffer> {
        let key = self.by_id.remove(id)?;
        let offer = self.offers.remove(&key)?;
        self.by_slave.remove(&offer.offer.slave_id);
        if let Some(timer) = self.timers.remove(id) {
            timer.abort();
        }
        Some(offer)
    }
}

/// Holding area for outstanding resource offers.
pub struct OfferQueue {
    driver: Arc<dyn Driver>,
    return_delay: Arc<dyn OfferReturnDelay>,
    maintenance: Arc<dyn MaintenanceController>,
    state: Mutex<QueueState>,
}

impl OfferQueue {
    pub fn new(
        driver: Arc<dyn Driver>,
        return_delay: Arc<dyn OfferReturnDelay>,
        maintenance: Arc<dyn MaintenanceController>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            return_delay,
            maintenance,
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Enqueue an offer and start its hold timer.
    ///
    /// If an offer from the same slave is already held, neither offer is
    /// retained: both are declined immediately.
    pub async fn add_offer(self: &Arc<Self>, offer: ResourceOffer) {
        let mode = self.maintenance.get_mode(&offer.host).await;
        let delay = self.return_delay.get();

        let duplicate_of = {
            let mut state = self.state.lock().await;
            if let Some(existing_id) = state.by_slave.get(&offer.slave_id).cloned() {
                state.remove(&existing_id);
                Some(existing_id)
            } else {
                let key = (mode.preference(), state.next_seq);
                state.next_seq += 1;
                state.offers.insert(
                    key,
                    HostOffer {
                        offer: offer.clone(),
                        mode,
                        received_at: Utc::now(),
                    },
                );
                state.by_id.insert(offer.id.clone(), key);
                state.by_slave.insert(offer.slave_id.clone(), offer.id.clone());

                let queue = Arc::clone(self);
                let offer_id = offer.id.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.expire(&offer_id).await;
                });
                state.timers.insert(offer.id.clone(), timer);
                None
            }
        };

        match duplicate_of {
            Some(existing_id) => {
                warn!(
                    slave_id = %offer.slave_id,
                    held_offer = %existing_id,
                    new_offer = %offer.id,
                    "Already holding an offer for slave, declining both"
                );
                self.decline_now(&existing_id).await;
                self.decline_now(&offer.id).await;
            }
            None => {
                debug!(
                    offer_id = %offer.id,
                    host = %offer.host,
                    mode = %mode,
                    hold_ms = delay.as_millis() as u64,
                    "Offer enqueued"
                );
            }
        }
    }

    /// Scan held offers in preference order and launch on the first match.
    ///
    /// The candidate set is a consistent snapshot: the queue is locked for
    /// the duration of the scan. If the acceptor fails, no offer is
    /// consumed. If the driver fails, the matched offer stays consumed;
    /// the manager re-offers on its own cadence.
    pub async fn launch_first(&self, acceptor: &dyn OfferAcceptor) -> Result<bool, LaunchError> {
        let mut state = self.state.lock().await;
        let candidates: Vec<HostOffer> = state.offers.values().cloned().collect();

        for candidate in candidates {
            let Some(assignment) = acceptor.accept(&candidate).await? else {
                continue;
            };
            state.remove(&candidate.offer.id);
            info!(
                offer_id = %candidate.offer.id,
                host = %candidate.offer.host,
                task_id = %assignment.task_id,
                "Launching task on offer"
            );
            self.driver
                .launch_task(&candidate.offer.id, &assignment)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Re-rank any held offers from a host whose maintenance mode changed.
    ///
    /// Arrival order is kept as the tie-break, so two offers in the same
    /// mode still scan oldest-first.
    pub async fn host_changed_state(&self, status: HostStatus) {
        let mut state = self.state.lock().await;
        let keys: Vec<OfferKey> = state
            .offers
            .iter()
            .filter(|(_, held)| held.offer.host == status.host)
            .map(|(key, _)| *key)
            .collect();

        for key in &keys {
            if let Some(mut held) = state.offers.remove(key) {
                held.mode = status.mode;
                let new_key = (status.mode.preference(), key.1);
                state.by_id.insert(held.offer.id.clone(), new_key);
                state.offers.insert(new_key, held);
            }
        }

        if !keys.is_empty() {
            debug!(
                host = %status.host,
                mode = %status.mode,
                offers = keys.len(),
                "Re-ranked offers after host maintenance change"
            );
        }
    }

    /// Number of offers currently held.
    pub async fn len(&self) -> usize {
        self.state.lock().await.offers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Hosts with a held offer, in current preference order.
    pub async fn offered_hosts(&self) -> Vec<HostId> {
        self.state
            .lock()
            .await
            .offers
            .values()
            .map(|held| held.offer.host.clone())
            .collect()
    }

    /// Hold timer body: decline the offer if it is still held.
    ///
    /// A timer racing a consume is harmless: the offer is gone from the
    /// queue and the decline becomes a no-op.
    async fn expire(&self, id: &OfferId) {
        let removed = self.state.lock().await.remove(id);
        let Some(held) = removed else {
            return;
        };
        debug!(
            offer_id = %id,
            host = %held.offer.host,
            "Offer hold expired, returning to manager"
        );
        self.decline_now(id).await;
    }

    async fn decline_now(&self, id: &OfferId) {
        if let Err(e) = self.driver.decline_offer(id).await {
            warn!(offer_id = %id, error = %e, "Failed to decline offer");
        }
    }
}
