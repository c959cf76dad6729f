//! # Explicit transactions.
//!
//! [`Transaction`] wraps a named savepoint (`_cf_savepoint_N`, N = nesting
//! depth) inside the store's single outer database transaction. Committing a
//! nested transaction releases its savepoint and propagates staged changes to
//! the enclosing level; it never talks to the scheduler or flushes
//! externally. Only the outermost commit arms a flush with the standard
//! alarm coupling.
//!
//! A handle dropped without `commit` rolls its savepoint back. Operating on
//! a transaction that has an open child, or after it closed, is an error.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::StoreError;
use crate::store::core::{ActorStore, FlushWaiter, StoreInner};
use crate::store::state::{savepoint_name, HandlerState, State, TxnLevel};

impl ActorStore {
    /// Opens an explicit transaction.
    ///
    /// An open implicit batch is committed synchronously first (its queued
    /// flush still runs the durability fence), unless it is being held open
    /// for an earlier-alarm scheduler acknowledgement; in that case the new
    /// savepoint nests inside it and that flush commits the combined batch
    /// once the transaction closes.
    pub fn start_transaction(&self) -> Result<Transaction, StoreError> {
        self.inner.check_usable()?;
        let inner = self.inner.clone();
        let mut st = inner.state.lock().unwrap();

        if st.levels.is_empty() && st.implicit_open && !st.needs_schedule_prelude() {
            inner.db.release(&savepoint_name(0))?;
            st.implicit_open = false;
        }

        let name_depth = usize::from(st.implicit_open) + st.levels.len();
        inner.db.savepoint(&savepoint_name(name_depth))?;
        st.levels.push(TxnLevel {
            name_depth,
            staged_alarm: None,
            dirty: false,
        });
        let index = st.levels.len() - 1;
        drop(st);

        Ok(Transaction {
            inner,
            index,
            name_depth,
            done: false,
        })
    }
}

/// Handle to one open savepoint level.
pub struct Transaction {
    inner: Arc<StoreInner>,
    /// Position in the store's level stack.
    index: usize,
    /// Depth baked into the savepoint name, frozen at open.
    name_depth: usize,
    done: bool,
}

impl Transaction {
    fn check_innermost(&self, st: &State) -> Result<(), StoreError> {
        if self.done {
            return Err(StoreError::InvalidTransaction {
                reason: "transaction already closed".into(),
            });
        }
        if st.levels.len() != self.index + 1 {
            return Err(StoreError::InvalidTransaction {
                reason: "transaction has an open child".into(),
            });
        }
        Ok(())
    }

    /// Reads a key through this transaction's staged writes.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.check_usable()?;
        self.check_innermost(&self.inner.state.lock().unwrap())?;
        self.inner.db.get(key)
    }

    /// Stages a write at this level.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        self.check_innermost(&st)?;
        st.levels[self.index].dirty = true;
        self.inner.db.put(key, value)
    }

    /// Stages a deletion; returns whether the key was visible beforehand.
    pub fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        self.check_innermost(&st)?;
        st.levels[self.index].dirty = true;
        self.inner.db.delete(key)
    }

    /// The alarm value as observed from inside this transaction.
    pub fn get_alarm(&self) -> Result<Option<SystemTime>, StoreError> {
        self.inner.check_usable()?;
        let st = self.inner.state.lock().unwrap();
        self.check_innermost(&st)?;
        Ok(st.effective_alarm())
    }

    /// Stages an alarm change at this level. The scheduler coupling happens
    /// when the outermost transaction commits; a rollback discards it.
    pub fn set_alarm(&self, time: Option<SystemTime>) -> Result<(), StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        self.check_innermost(&st)?;
        if st.effective_alarm() == time {
            return Ok(());
        }
        if let HandlerState::Armed { fire_time, .. } = st.handler {
            st.handler = HandlerState::Armed {
                fire_time,
                deferred_delete: false,
                dirty: true,
            };
        }
        self.inner.db.write_alarm(time)?;
        let level = &mut st.levels[self.index];
        level.staged_alarm = Some(time);
        level.dirty = true;
        Ok(())
    }

    /// Opens a nested transaction inside this one.
    pub fn start_transaction(&self) -> Result<Transaction, StoreError> {
        self.inner.check_usable()?;
        let inner = self.inner.clone();
        let mut st = inner.state.lock().unwrap();
        self.check_innermost(&st)?;
        let name_depth = self.name_depth + 1;
        inner.db.savepoint(&savepoint_name(name_depth))?;
        st.levels.push(TxnLevel {
            name_depth,
            staged_alarm: None,
            dirty: false,
        });
        let index = st.levels.len() - 1;
        drop(st);
        Ok(Transaction {
            inner,
            index,
            name_depth,
            done: false,
        })
    }

    /// Commits this level.
    ///
    /// Nested commits release the savepoint and merge staged changes into
    /// the parent; the returned waiter is already resolved. The outermost
    /// commit arms a flush and its waiter resolves once the batch is durable
    /// and the scheduler is in sync.
    pub fn commit(mut self) -> Result<FlushWaiter, StoreError> {
        let inner = self.inner.clone();
        let mut st = inner.state.lock().unwrap();
        self.check_innermost(&st)?;
        self.done = true;
        let level = st.levels.pop().expect("checked innermost level exists");

        if self.index > 0 {
            inner.db.release(&savepoint_name(self.name_depth))?;
            let parent = st
                .levels
                .last_mut()
                .expect("nested transaction has a parent");
            if let Some(staged) = level.staged_alarm {
                parent.staged_alarm = Some(staged);
            }
            parent.dirty |= level.dirty;
            return Ok(FlushWaiter::ready());
        }

        // Outermost explicit commit.
        inner.txn_idle.notify_waiters();
        if self.name_depth == 0 {
            if !level.dirty {
                inner.db.release(&savepoint_name(0))?;
                return Ok(FlushWaiter::ready());
            }
            // Hand the root savepoint to the coordinator so the flush task
            // can order the scheduler call against its release.
            st.implicit_open = true;
        } else {
            // Nested inside an implicit transaction held open for scheduler
            // ordering: release locally, that flush carries the batch.
            inner.db.release(&savepoint_name(self.name_depth))?;
            if !level.dirty {
                return Ok(FlushWaiter::ready());
            }
        }
        if let Some(staged) = level.staged_alarm {
            st.pending_alarm = Some(staged);
        }
        let (tx, rx) = oneshot::channel();
        st.waiters.push(tx);
        inner.arm_flush(&mut st);
        Ok(FlushWaiter::new(rx))
    }

    /// Rolls this level back, discarding staged writes and alarm changes.
    pub fn rollback(mut self) -> Result<(), StoreError> {
        self.rollback_impl()
    }

    fn rollback_impl(&mut self) -> Result<(), StoreError> {
        if self.done {
            return Ok(());
        }
        let inner = self.inner.clone();
        let mut st = inner.state.lock().unwrap();
        if st.levels.len() != self.index + 1 {
            return Err(StoreError::InvalidTransaction {
                reason: "transaction has an open child".into(),
            });
        }
        self.done = true;
        st.levels.pop();
        let name = savepoint_name(self.name_depth);
        inner.db.rollback_to(&name)?;
        inner.db.release(&name)?;
        if self.index == 0 {
            inner.txn_idle.notify_waiters();
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.rollback_impl() {
                warn!(error = %e, "transaction rollback on drop failed");
            }
        }
    }
}
