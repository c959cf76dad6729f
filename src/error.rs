//! # Error types used by the coordinator and its collaborators.
//!
//! This module defines [`StoreError`], the single error enum shared by the
//! output gate, the database capability, the scheduler coupling, and the
//! transaction machinery.
//!
//! The type is `Clone` on purpose: once the output gate latches a failure,
//! the *original* error is handed back verbatim to every later caller, so the
//! same value must be cloneable across an arbitrary number of waiters.
//! It provides an `as_label` helper for logs/metrics.

use thiserror::Error;

/// Errors produced by storage, commit, and alarm-scheduling operations.
///
/// Any of these can become the latched "broken" error of an
/// [`OutputGate`](crate::OutputGate), after which every subsequent operation
/// on the owning store fails with a clone of the same value.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The durability fence for a local commit rejected.
    #[error("commit failed: {reason}")]
    CommitFailed {
        /// Description passed through from the fence.
        reason: String,
    },

    /// The external alarm scheduler rejected a `schedule_run` request.
    #[error("scheduler rejected request: {reason}")]
    SchedulerRejected {
        /// Description passed through from the scheduler.
        reason: String,
    },

    /// The embedded database reported a failure.
    #[error("storage error: {reason}")]
    Storage {
        /// Description passed through from the engine.
        reason: String,
    },

    /// A savepoint was released or rolled back that the engine does not know.
    #[error("no such savepoint: {name}")]
    UnknownSavepoint {
        /// The savepoint name that failed to resolve.
        name: String,
    },

    /// An explicit transaction handle was used out of protocol, e.g. operating
    /// on a transaction that has an open child, or committing twice.
    #[error("invalid transaction state: {reason}")]
    InvalidTransaction {
        /// What the caller did wrong.
        reason: String,
    },

    /// The store was shut down; all operations fail from then on.
    #[error("storage has been shut down")]
    Shutdown,
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::CommitFailed { .. } => "store_commit_failed",
            StoreError::SchedulerRejected { .. } => "store_scheduler_rejected",
            StoreError::Storage { .. } => "store_storage",
            StoreError::UnknownSavepoint { .. } => "store_unknown_savepoint",
            StoreError::InvalidTransaction { .. } => "store_invalid_transaction",
            StoreError::Shutdown => "store_shutdown",
        }
    }
}
