//! # Database capability.
//!
//! The coordinator owns exactly one [`Database`] and drives it synchronously;
//! the only asynchronous part of durability is the commit fence supplied to
//! [`ActorStore::new`](crate::ActorStore::new), which resolves once the
//! engine's own log has been synced (or replicated).
//!
//! ## Savepoint contract
//!
//! Savepoints are named and nest. Opening a savepoint with no transaction
//! outstanding starts one; releasing the outermost savepoint commits the
//! transaction synchronously (SQLite semantics). `rollback_to` discards the
//! writes staged under a savepoint but leaves the savepoint itself open.
//! Releasing or rolling back to an unknown name is an error.
//!
//! The alarm time is stored in the same database as the key/value data so
//! that alarm changes commit atomically with ordinary writes.

use std::time::SystemTime;

use crate::error::StoreError;

mod mem;

pub use mem::MemDb;

/// Embedded storage engine surface used by the coordinator.
///
/// Values are opaque bytes. All methods are synchronous; implementations are
/// expected to buffer writes under the innermost open savepoint.
pub trait Database: Send + Sync {
    /// Reads a key through any staged writes.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stages a write under the innermost open savepoint.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Stages a deletion; returns whether the key was visible beforehand.
    fn delete(&self, key: &[u8]) -> Result<bool, StoreError>;

    /// Stages deletion of every key; returns how many were visible.
    fn delete_all(&self) -> Result<usize, StoreError>;

    /// Range read through staged writes. `end` is exclusive; `None` means
    /// unbounded. Results come back in key order, reversed when `reverse`.
    fn list(
        &self,
        begin: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Reads the alarm time through any staged writes.
    fn read_alarm(&self) -> Result<Option<SystemTime>, StoreError>;

    /// Stages an alarm-time write under the innermost open savepoint.
    fn write_alarm(&self, time: Option<SystemTime>) -> Result<(), StoreError>;

    /// Opens a named savepoint, starting a transaction if none is open.
    fn savepoint(&self, name: &str) -> Result<(), StoreError>;

    /// Releases the named savepoint (and everything nested inside it),
    /// merging its writes into the enclosing level. Releasing the outermost
    /// savepoint commits.
    fn release(&self, name: &str) -> Result<(), StoreError>;

    /// Discards writes staged at and inside the named savepoint. The named
    /// savepoint itself stays open.
    fn rollback_to(&self, name: &str) -> Result<(), StoreError>;
}
