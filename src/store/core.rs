//! # `ActorStore`: the durable coordinator facade.
//!
//! Owns the database, the scheduler capability, the commit fence, and the
//! shared coordinator state; wires staged writes into flush tasks (see
//! [`flush`](super::flush)) and arbitrates alarm-handler arming.
//!
//! Writes made without any await in between share one implicit transaction
//! (root savepoint `_cf_savepoint_0`) and commit as a single atomic unit,
//! which also lets the engine coalesce page writes across statements.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::SystemTime;

use futures::future::BoxFuture;
use tokio::sync::{oneshot, Notify};
use tracing::debug;

use crate::db::Database;
use crate::error::StoreError;
use crate::gate::OutputGate;
use crate::sched::Scheduler;
use crate::store::alarm::AlarmHandle;
use crate::store::state::{savepoint_name, HandlerState, State};

/// Asynchronous durability fence invoked after each synchronous commit.
///
/// The output gate blocks on the returned future; use it when the database
/// must be replicated (or its log synced) before results are observable.
pub type CommitFence = Box<dyn Fn() -> BoxFuture<'static, Result<(), StoreError>> + Send + Sync>;

pub(crate) struct StoreInner {
    pub db: Arc<dyn Database>,
    pub scheduler: Arc<dyn Scheduler>,
    pub fence: CommitFence,
    pub gate: OutputGate,
    pub state: Mutex<State>,
    /// Pinged when an explicit transaction closes, so a flush task waiting to
    /// commit the enclosing implicit transaction can re-check.
    pub txn_idle: Notify,
}

impl StoreInner {
    /// Fails once the store is shut down or the gate has latched an error.
    ///
    /// Detection of a commit failure is asynchronous: a call racing the
    /// failing task may still succeed, but every call after the gate latches
    /// fails with a clone of the original error.
    pub(crate) fn check_usable(&self) -> Result<(), StoreError> {
        if let Some(e) = &self.state.lock().unwrap().shutdown {
            return Err(e.clone());
        }
        if let Some(e) = self.gate.broken() {
            return Err(e);
        }
        Ok(())
    }

    /// Opens the implicit root transaction and arms a flush, unless an
    /// explicit transaction currently owns the write path.
    pub(crate) fn ensure_write_txn(self: &Arc<Self>, st: &mut State) -> Result<(), StoreError> {
        if !st.levels.is_empty() {
            return Ok(());
        }
        if !st.implicit_open {
            self.db.savepoint(&savepoint_name(0))?;
            st.implicit_open = true;
        }
        self.arm_flush(st);
        Ok(())
    }
}

/// Durable actor-state coordinator.
///
/// Combines key/value storage and at most one alarm behind an
/// [`OutputGate`], ordering local durability against the external scheduler
/// so the scheduler never learns of an alarm that is not yet durable, and
/// local durability never races ahead of a scheduled earlier alarm.
///
/// The store assumes it is the single writer for one logical actor, driven
/// from one actor-local event loop. A broken gate is terminal for the
/// actor's lifetime.
#[derive(Clone)]
pub struct ActorStore {
    pub(crate) inner: Arc<StoreInner>,
}

impl ActorStore {
    /// Creates a coordinator over `db`, reporting effects through `gate`.
    ///
    /// `fence` is invoked after every synchronous commit; the gate blocks on
    /// it. The committed alarm value is read from the database, and the
    /// scheduler is presumed to have acknowledged that same value in a prior
    /// run.
    pub fn new(
        db: Arc<dyn Database>,
        gate: OutputGate,
        fence: CommitFence,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, StoreError> {
        let committed = db.read_alarm()?;
        let mut state = State::new();
        state.committed_alarm = committed;
        state.scheduled_alarm = committed;
        Ok(Self {
            inner: Arc::new(StoreInner {
                db,
                scheduler,
                fence,
                gate,
                state: Mutex::new(state),
                txn_idle: Notify::new(),
            }),
        })
    }

    /// The gate this store reports effects through.
    pub fn gate(&self) -> &OutputGate {
        &self.inner.gate
    }

    /// True while a commit is outstanding for staged writes.
    pub fn is_commit_scheduled(&self) -> bool {
        let st = self.inner.state.lock().unwrap();
        st.implicit_open || st.flush_armed
    }

    /// Reads a key through any staged writes.
    ///
    /// Staged and cached values resolve without yielding; a cold key awaits
    /// the database.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.check_usable()?;
        self.inner.db.get(key)
    }

    /// Range read in key order. `end` is exclusive; `None` means unbounded.
    pub async fn list(
        &self,
        begin: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.inner.check_usable()?;
        self.inner.db.list(begin, end, limit, false)
    }

    /// Range read in reverse key order.
    pub async fn list_reverse(
        &self,
        begin: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.inner.check_usable()?;
        self.inner.db.list(begin, end, limit, true)
    }

    /// Stages a write into the current atomic batch.
    ///
    /// Durability is observable through [`ActorStore::on_no_pending_flush`]
    /// or the gate.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        self.inner.ensure_write_txn(&mut st)?;
        self.inner.db.put(key, value)
    }

    /// Stages a deletion; returns whether the key was visible beforehand.
    pub fn delete(&self, key: &[u8]) -> Result<bool, StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        self.inner.ensure_write_txn(&mut st)?;
        self.inner.db.delete(key)
    }

    /// Stages deletion of every key; returns how many were visible.
    pub fn delete_all(&self) -> Result<usize, StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        self.inner.ensure_write_txn(&mut st)?;
        self.inner.db.delete_all()
    }

    /// The alarm value the caller would observe if everything staged
    /// committed. Reads as `None` while an alarm handler is armed, so the
    /// handler's own logic does not see the alarm it is about to delete.
    pub fn get_alarm(&self) -> Result<Option<SystemTime>, StoreError> {
        self.inner.check_usable()?;
        Ok(self.inner.state.lock().unwrap().effective_alarm())
    }

    /// Stages an alarm change and arms a commit with scheduler coupling.
    ///
    /// Setting the alarm to its existing effective value is a pure no-op: no
    /// scheduler call, no commit, and the returned waiter is already
    /// resolved. Otherwise the waiter resolves once the commit covering this
    /// change (and, for earlier-moving alarms, every change coalesced with
    /// it) is durable and the scheduler is in sync.
    pub fn set_alarm(&self, time: Option<SystemTime>) -> Result<FlushWaiter, StoreError> {
        self.inner.check_usable()?;
        let inner = &self.inner;
        let mut st = inner.state.lock().unwrap();

        if st.effective_alarm() == time {
            return Ok(FlushWaiter::ready());
        }
        if let HandlerState::Armed { fire_time, .. } = st.handler {
            st.handler = HandlerState::Armed {
                fire_time,
                deferred_delete: false,
                dirty: true,
            };
        }
        if let Some(level) = st.levels.last_mut() {
            // Inside an explicit transaction: stage only. The outermost
            // commit couples to the scheduler.
            inner.db.write_alarm(time)?;
            level.staged_alarm = Some(time);
            level.dirty = true;
            return Ok(FlushWaiter::ready());
        }

        if !st.implicit_open {
            inner.db.savepoint(&savepoint_name(0))?;
            st.implicit_open = true;
        }
        inner.db.write_alarm(time)?;
        st.pending_alarm = Some(time);
        let (tx, rx) = oneshot::channel();
        st.waiters.push(tx);
        inner.arm_flush(&mut st);
        Ok(FlushWaiter::new(rx))
    }

    /// Arbitrates an alarm fire reported by the scheduler.
    ///
    /// Returns `None`, meaning "cancel, no handler should run", when the
    /// committed alarm is unset or differs from `fire_time`, which is how the
    /// scheduler discovers stale fires after the coordinator changed its
    /// mind. Otherwise returns a token; while it is held the alarm reads as
    /// cleared, and dropping it without writes commits that deletion.
    pub fn arm_alarm_handler(
        &self,
        fire_time: SystemTime,
        is_retry: bool,
    ) -> Result<Option<AlarmHandle>, StoreError> {
        self.inner.check_usable()?;
        let mut st = self.inner.state.lock().unwrap();
        if st.handler != HandlerState::Idle {
            debug!("declining to arm: handler armed or deletion still flushing");
            return Ok(None);
        }
        if st.committed_alarm != Some(fire_time) {
            debug!(is_retry, "declining to arm: committed alarm does not match");
            return Ok(None);
        }
        st.handler = HandlerState::Armed {
            fire_time,
            deferred_delete: true,
            dirty: false,
        };
        Ok(Some(AlarmHandle::new(self.inner.clone())))
    }

    /// Keeps the current alarm across the running handler instead of the
    /// default deferred deletion. Idempotent; a no-op outside a handler.
    pub fn cancel_deferred_alarm_deletion(&self) {
        let mut st = self.inner.state.lock().unwrap();
        if let HandlerState::Armed {
            fire_time, dirty, ..
        } = st.handler
        {
            st.handler = HandlerState::Armed {
                fire_time,
                deferred_delete: false,
                dirty,
            };
        }
    }

    /// Resolves once every queued commit has settled; fails if the gate is,
    /// or becomes, broken.
    pub async fn on_no_pending_flush(&self) -> Result<(), StoreError> {
        self.inner.gate.wait().await
    }

    /// Latches a terminal error so every later operation fails. In-flight
    /// commits are left to finish. The gate itself is not poisoned; only
    /// failures poison the gate.
    pub fn shutdown(&self, error: Option<StoreError>) {
        let mut st = self.inner.state.lock().unwrap();
        if st.shutdown.is_none() {
            st.shutdown = Some(error.unwrap_or(StoreError::Shutdown));
        }
    }
}

/// Resolves when the commit covering a staged change is durable and the
/// scheduler is in sync; yields the poisoning error if the flush failed.
pub struct FlushWaiter {
    rx: oneshot::Receiver<Result<(), StoreError>>,
}

impl FlushWaiter {
    pub(crate) fn new(rx: oneshot::Receiver<Result<(), StoreError>>) -> Self {
        Self { rx }
    }

    /// An already-resolved waiter, for no-op writes.
    pub(crate) fn ready() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Ok(()));
        Self { rx }
    }
}

impl Future for FlushWaiter {
    type Output = Result<(), StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(inner) => inner,
            Err(_) => Err(StoreError::CommitFailed {
                reason: "commit task dropped".into(),
            }),
        })
    }
}
