//! Capstan scheduler core.
//!
//! Matches pending tasks against a stream of resource offers from an
//! external cluster resource manager. Three subsystems cooperate:
//!
//! - [`offers::OfferQueue`] holds outstanding offers in maintenance-
//!   preference order, each with a hold timer that returns it to the
//!   manager if nothing matches.
//! - [`groups::TaskGroups`] batches fungible pending tasks into groups
//!   and drives placement attempts with exponential backoff under a
//!   global rate limit.
//! - [`scheduler::TaskSchedulerImpl`] performs one attempt: read the
//!   task, consult the assigner for each candidate offer, launch on a
//!   match, or record a preemption reservation and retry later.
//!
//! Storage, the manager driver, maintenance state, the assigner, and the
//! preemptor are external collaborators behind traits; this crate owns
//! only the matching machinery.

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod groups;
pub mod offers;
pub mod rate;
pub mod scheduler;
pub mod stats;
pub mod storage;
