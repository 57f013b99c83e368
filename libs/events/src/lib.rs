//! # capstan-events
//!
//! Cluster vocabulary and event definitions for the capstan scheduler.
//!
//! ## Design Principles
//!
//! - Events are immutable records of validated state transitions
//! - Task state transitions carry the full task snapshot, not just the id,
//!   so sinks never have to re-read storage to route an event
//! - The task-config fingerprint is deterministic: identical configs hash
//!   identically regardless of field ordering
//!
//! ## Event Types
//!
//! The scheduler core consumes three inbound event families:
//! - Task events (`task.state_changed`, `task.deleted`)
//! - Host events (`host.maintenance_state_changed`)

mod events;
mod types;

pub use events::*;
pub use types::*;
