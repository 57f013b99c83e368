//! Typed ID definitions for the scheduler's resource kinds.
//!
//! Task IDs are usually minted by capstan; offer, slave, and host
//! identifiers originate in the external resource manager and pass
//! through `parse` untouched.

use crate::define_id;

// =============================================================================
// Tasks
// =============================================================================

define_id!(TaskId, "task");

// =============================================================================
// Resource Manager Vocabulary
// =============================================================================

define_id!(OfferId, "offer");
define_id!(SlaveId, "slave");
define_id!(HostId, "host");

// =============================================================================
// Tests
// =============================================================================
