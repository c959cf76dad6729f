//! # Commit flush tasks and scheduler coupling.
//!
//! Every batch of staged writes is carried to durability by a spawned flush
//! task running under the output gate. The task orders two externally
//! observable effects: the synchronous release of the root savepoint (plus
//! the durability fence) and the external scheduler's acknowledgement of the
//! new alarm time.
//!
//! ```text
//!  set_alarm(earlier)          set_alarm(later / none)
//!        │                            │
//!        ▼                            ▼
//!  schedule_run(t) ──ack──►  release savepoint (sync commit)
//!  (txn held open,                    │
//!   re-issued while the         durability fence
//!   staged value moves)               │
//!        │                      schedule_run(t)
//!        ▼                            │
//!  release + fence              release waiters
//!        │
//!  release waiters (all
//!  coalesced together)
//! ```
//!
//! - **Earlier** alarms must be known to the scheduler before they are
//!   durable: after a crash the scheduler must never hold a time the database
//!   does not. While the acknowledgement is in flight, further earlier-moving
//!   changes coalesce; one follow-up call carries the latest value and one
//!   commit covers the whole batch.
//! - **Later or cleared** alarms commit first; a spurious fire is harmless
//!   because the arming check cancels it. Post-commit notifications are
//!   chained so at most one scheduler call is ever outstanding.
//! - Any failure poisons the gate (first error wins) and fails every waiter
//!   registered for the batch with a clone of the same error.

use std::mem;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::core::StoreInner;
use crate::store::state::{savepoint_name, HandlerState, PhaseDone, State, Waiter};

impl StoreInner {
    /// Arms a flush task for the currently staged batch. No-op while an
    /// armed task has not yet captured the batch; staged changes made in the
    /// meantime ride along with it.
    pub(crate) fn arm_flush(self: &Arc<Self>, st: &mut State) {
        if st.flush_armed {
            return;
        }
        st.flush_armed = true;

        let prev_sync = st.sync_tail.take();
        let prev_sched = st.sched_tail.take();
        let (sync_tx, sync_rx) = oneshot::channel::<()>();
        let (sched_tx, sched_rx) = oneshot::channel::<()>();
        st.sync_tail = Some(sync_rx.map(|_| ()).boxed().shared());
        st.sched_tail = Some(sched_rx.map(|_| ()).boxed().shared());

        debug!("commit task armed");
        // Take the gate slot here, not in the spawned task: `wait()` must
        // observe the armed commit the instant the write returns, before the
        // task has been polled once.
        let slot = self.gate.acquire();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // The slot latches any failure as the gate's broken state; the
            // task itself has already notified its waiters by then.
            let _ = slot
                .complete_while(inner.run_flush(prev_sync, prev_sched, sync_tx, sched_tx))
                .await;
        });
    }

    async fn run_flush(
        self: Arc<Self>,
        prev_sync: Option<PhaseDone>,
        prev_sched: Option<PhaseDone>,
        sync_done: oneshot::Sender<()>,
        sched_done: oneshot::Sender<()>,
    ) -> Result<(), StoreError> {
        // A batch armed just before the gate latched must still fail its
        // waiters; there is no point talking to the scheduler or the fence
        // for a store that is already broken.
        if let Some(e) = self.gate.broken() {
            self.abort_open_txn();
            let waiters = self.take_waiters();
            let _ = sync_done.send(());
            let _ = sched_done.send(());
            fail_waiters(waiters, &e);
            return Err(e);
        }

        // The predecessor must have released the database first.
        if let Some(prev) = prev_sync {
            prev.await;
        }

        // Scheduler prelude: an earlier alarm is acknowledged while the local
        // transaction is still open. Loops because the staged value can move
        // again while a call is in flight; the single follow-up call carries
        // whatever is latest once the in-flight call lands.
        loop {
            let target = {
                let st = self.state.lock().unwrap();
                if st.needs_schedule_prelude() {
                    st.pending_alarm.flatten()
                } else {
                    None
                }
            };
            let Some(time) = target else { break };
            debug!(?time, "schedule_run before commit");
            match self.scheduler.schedule_run(Some(time)).await {
                Ok(()) => {
                    self.state.lock().unwrap().scheduled_alarm = Some(time);
                }
                Err(e) => {
                    // Nothing becomes durable: roll the open transaction back
                    // and fail the whole batch.
                    self.abort_open_txn();
                    let waiters = self.take_waiters();
                    let _ = sync_done.send(());
                    let _ = sched_done.send(());
                    fail_waiters(waiters, &e);
                    return Err(e);
                }
            }
        }

        // Capture the batch and commit it synchronously. If explicit
        // transactions are nested inside our open root savepoint, wait for
        // them to close first; the ordering invariant is never traded for an
        // early commit.
        let (captured, waiters, post_sched) = loop {
            let mut notified = std::pin::pin!(self.txn_idle.notified());
            // Register before re-checking so a close between the check and
            // the await cannot be missed.
            notified.as_mut().enable();
            {
                let mut st = self.state.lock().unwrap();
                if !(st.implicit_open && !st.levels.is_empty()) {
                    st.flush_armed = false;
                    let captured = st.pending_alarm.take();
                    let waiters = mem::take(&mut st.waiters);
                    let post_sched = match captured {
                        Some(value) if value != st.scheduled_alarm => Some(value),
                        _ => None,
                    };
                    if st.implicit_open {
                        if let Err(e) = self.db.release(&savepoint_name(0)) {
                            st.implicit_open = false;
                            drop(st);
                            let _ = sync_done.send(());
                            let _ = sched_done.send(());
                            fail_waiters(waiters, &e);
                            return Err(e);
                        }
                        st.implicit_open = false;
                    }
                    if let Some(value) = captured {
                        st.committed_alarm = value;
                    }
                    break (captured, waiters, post_sched);
                }
            }
            notified.await;
        };
        // The database is free; a successor may open its own transaction.
        let _ = sync_done.send(());

        debug!("commit fence");
        if let Err(e) = (self.fence)().await {
            let _ = sched_done.send(());
            fail_waiters(waiters, &e);
            return Err(e);
        }

        // Later-direction and clearing notifications run only after the
        // commit is durable, and are chained behind the predecessor's so at
        // most one scheduler call is outstanding.
        if let Some(prev) = prev_sched {
            prev.await;
        }
        if let Some(value) = post_sched {
            debug!(?value, "schedule_run after commit");
            if let Err(e) = self.scheduler.schedule_run(value).await {
                let _ = sched_done.send(());
                fail_waiters(waiters, &e);
                return Err(e);
            }
            self.state.lock().unwrap().scheduled_alarm = value;
        }
        let _ = sched_done.send(());

        {
            let mut st = self.state.lock().unwrap();
            if captured.is_some() && st.handler == HandlerState::Deleting {
                st.handler = HandlerState::Idle;
            }
        }
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        Ok(())
    }

    /// Rolls back the open implicit transaction after a scheduler rejection.
    fn abort_open_txn(&self) {
        let mut st = self.state.lock().unwrap();
        if st.implicit_open {
            let name = savepoint_name(0);
            let rolled = self
                .db
                .rollback_to(&name)
                .and_then(|_| self.db.release(&name));
            if let Err(e) = rolled {
                warn!(error = %e, "rollback after scheduler rejection failed");
            }
            st.implicit_open = false;
        }
        st.pending_alarm = None;
        st.flush_armed = false;
    }

    fn take_waiters(&self) -> Vec<Waiter> {
        mem::take(&mut self.state.lock().unwrap().waiters)
    }
}

fn fail_waiters(waiters: Vec<Waiter>, err: &StoreError) {
    for waiter in waiters {
        let _ = waiter.send(Err(err.clone()));
    }
}
