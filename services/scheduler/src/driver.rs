//! Resource manager driver seam.
//!
//! The driver wraps the outbound RPC surface of the external resource
//! manager. Launches can fail transiently while the driver (re)connects;
//! declines are fire-and-forget and idempotent on the manager side.

use async_trait::async_trait;
use capstan_events::TaskAssignment;
use capstan_id::OfferId;
use thiserror::Error;

/// Errors from driver calls.
#[derive(Debug, Error, Clone)]
pub enum DriverError {
    /// The driver is not connected to the resource manager yet.
    #[error("driver is not ready")]
    NotReady,

    /// The RPC was attempted and failed.
    #[error("driver call failed: {0}")]
    Failed(String),
}

/// Outbound calls to the resource manager.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Launch a task against a held offer.
    async fn launch_task(
        &self,
        offer_id: &OfferId,
        assignment: &TaskAssignment,
    ) -> Result<(), DriverError>;

    /// Return an offer to the resource manager.
    async fn decline_offer(&self, offer_id: &OfferId) -> Result<(), DriverError>;
}
