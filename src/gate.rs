//! # Output gate: a FIFO barrier for externally observable effects.
//!
//! [`OutputGate`] prevents results from being reported to the outside world
//! before the durability work backing them has completed. Commit tasks run
//! under [`OutputGate::lock_while`]; anything that wants read-your-writes
//! ordering awaits [`OutputGate::wait`].
//!
//! ## Key characteristics
//! - **Serial slots**: a producer starts running immediately, but its result
//!   is published only once every previously enqueued producer has finished.
//! - **Latched brokenness**: the first producer failure poisons the gate; all
//!   in-flight and future `wait`/`lock_while` calls fail with a clone of that
//!   same error. Later, distinct failures are ignored.
//! - **Asynchronous detection**: an operation issued after a failure but
//!   before the failing task has run to completion may still succeed; the
//!   guarantee is only that some subsequent operation fails.
//!
//! ```text
//!   lock_while(p1) ──┐
//!   lock_while(p2) ──┤  producers run concurrently,
//!   lock_while(p3) ──┤  results publish in slot order
//!                    ▼
//!             [ p1 → p2 → p3 ]──► wait() resolves
//!                    │
//!                 failure ──► on_broken() resolves, gate poisoned
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{oneshot, watch};
use tracing::warn;

use crate::error::StoreError;

/// FIFO barrier with a terminal broken state.
///
/// Cheaply clonable; all clones share the same slot chain and broken flag.
#[derive(Clone)]
pub struct OutputGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    /// Completion of the most recently enqueued slot. `None` when drained.
    tail: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
    /// Becomes `Some` exactly once, at the first producer failure.
    broken: watch::Sender<Option<StoreError>>,
}

impl OutputGate {
    /// Creates an open gate with no pending slots.
    pub fn new() -> Self {
        let (broken, _) = watch::channel(None);
        Self {
            inner: Arc::new(GateInner {
                tail: Mutex::new(None),
                broken,
            }),
        }
    }

    /// Returns the latched error, if the gate is broken.
    pub fn broken(&self) -> Option<StoreError> {
        self.inner.broken.borrow().clone()
    }

    /// Latches `err` as the broken state. The first error wins; subsequent
    /// calls are ignored and the original error is kept.
    pub(crate) fn break_with(&self, err: StoreError) {
        self.inner.broken.send_if_modified(|slot| {
            if slot.is_none() {
                warn!(error = %err, label = err.as_label(), "output gate broken");
                *slot = Some(err);
                true
            } else {
                false
            }
        });
    }

    /// Synchronously acquires a serial slot, so that `wait()` observes the
    /// pending work from this instant on, even before the producer has been
    /// polled once. Complete it with [`GateSlot::complete_while`].
    pub(crate) fn acquire(&self) -> GateSlot {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let prev = {
            let mut tail = self.inner.tail.lock().unwrap();
            tail.replace(done_rx.map(|_| ()).boxed().shared())
        };
        GateSlot {
            gate: self.clone(),
            prev,
            done_tx,
        }
    }

    /// Acquires a serial slot, runs `producer`, and publishes its result only
    /// after every previously acquired slot has completed.
    ///
    /// A failing producer permanently poisons the gate. The producer always
    /// runs (it may need to release resources it owns), but once the gate is
    /// broken, by a predecessor or by this producer, the latched error is
    /// returned instead of the producer's result.
    pub async fn lock_while<T, F>(&self, producer: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.acquire().complete_while(producer).await
    }

    /// Resolves once the gate has drained of all currently enqueued work.
    ///
    /// Fails with the latched error if the gate is, or becomes, broken.
    pub async fn wait(&self) -> Result<(), StoreError> {
        if let Some(e) = self.broken() {
            return Err(e);
        }
        let tail = self.inner.tail.lock().unwrap().clone();
        if let Some(tail) = tail {
            tail.await;
        }
        match self.broken() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolves with the latched error once the gate breaks.
    ///
    /// Never resolves if the gate stays healthy for the life of the store.
    pub async fn on_broken(&self) -> StoreError {
        let mut rx = self.inner.broken.subscribe();
        loop {
            if let Some(e) = rx.borrow_and_update().clone() {
                return e;
            }
            if rx.changed().await.is_err() {
                // The sender lives inside this gate's shared state, so this
                // only happens when every handle is gone mid-poll.
                futures::future::pending::<()>().await;
            }
        }
    }
}

impl Default for OutputGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A serial slot acquired with [`OutputGate::acquire`] but not yet run.
///
/// Dropping the slot without completing it unblocks successors; the slot's
/// own work is then simply absent from the publication order.
pub(crate) struct GateSlot {
    gate: OutputGate,
    prev: Option<Shared<BoxFuture<'static, ()>>>,
    done_tx: oneshot::Sender<()>,
}

impl GateSlot {
    /// Runs `producer` in this slot and publishes its result once every
    /// predecessor has completed. Failure semantics match
    /// [`OutputGate::lock_while`].
    pub(crate) async fn complete_while<T, F>(self, producer: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = producer.await;
        if let Some(prev) = self.prev {
            prev.await;
        }
        let _ = self.done_tx.send(());

        match result {
            Ok(value) => match self.gate.broken() {
                Some(e) => Err(e),
                None => Ok(value),
            },
            Err(e) => {
                self.gate.break_with(e.clone());
                // Whoever latched first wins; later failures surface the
                // original error, preserved verbatim.
                Err(self.gate.broken().unwrap_or(e))
            }
        }
    }
}
