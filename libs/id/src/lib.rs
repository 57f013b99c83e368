//! # capstan-id
//!
//! Typed identifiers for the capstan scheduler.
//!
//! ## Design Principles
//!
//! - IDs are typed to prevent mixing different resource kinds (a `SlaveId`
//!   is never silently used where an `OfferId` belongs)
//! - IDs minted by capstan use a prefixed format: `{prefix}_{ulid}`
//! - IDs assigned by the external resource manager (offer ids, slave ids,
//!   task ids created by other components) are opaque strings and are
//!   accepted verbatim by `parse`
//! - IDs support roundtrip serialization (parse → format → parse)
//!
//! Locally minted IDs look like `task_01HV4Z2WQXKJNM8GPQY6VBKC3D`; the
//! ULID portion keeps them time-ordered, which gives the scheduler stable
//! iteration order for free.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
