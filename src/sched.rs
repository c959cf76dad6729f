//! # External alarm scheduler capability.
//!
//! The coordinator never arms timers itself; it talks to a remote scheduling
//! service through the [`Scheduler`] trait and relies on the ordering rules in
//! [`store`](crate::store) to decide *when* to talk to it relative to local
//! durability.
//!
//! The coordinator guarantees at most one outstanding `schedule_run` call per
//! store instance. Implementations may therefore be plain sequential clients.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::StoreError;

/// Capability for requesting that an alarm handler be run at a given time.
///
/// `None` means "cancel any pending alarm". A resolved future means the
/// scheduler has durably acknowledged the request; a rejection permanently
/// poisons the calling store's output gate.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Asks the scheduler to (re)arm or cancel the alarm for this actor.
    async fn schedule_run(&self, time: Option<SystemTime>) -> Result<(), StoreError>;
}
