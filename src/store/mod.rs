//! # Durable actor-state coordination.
//!
//! This module contains the coordinator that sits between the embedded
//! database and the external alarm scheduler.
//!
//! ## Files & responsibilities
//! - **core.rs**: public facade [`ActorStore`]; owns the database, scheduler,
//!   fence, and shared state; stages writes and alarm changes.
//! - **flush.rs**: the ordering core; flush tasks that commit each staged
//!   batch and couple the commit to `schedule_run` per the direction rules.
//! - **state.rs**: coordinator state (committed/pending/scheduled alarm,
//!   handler arming, transaction levels).
//! - **txn.rs**: explicit transactions over named savepoints.
//! - **alarm.rs**: the handler arming token and deferred deletion.
//!
//! ## Ordering (who waits for whom)
//! ```text
//! put/set_alarm (sync)            flush task (per batch)
//!   ├─ open _cf_savepoint_0        ├─ predecessor db release
//!   ├─ stage writes                ├─ earlier alarm? schedule_run first,
//!   └─ arm flush ───────────────►  │  coalescing staged follow-ups
//!                                  ├─ release savepoint (sync commit)
//!        waiters from every        ├─ durability fence
//!        coalesced set_alarm ◄──── ├─ later/cleared alarm? schedule_run,
//!        release together          │  chained after predecessor's
//!                                  └─ resolve waiters / poison gate
//! ```
//!
//! A failing flush latches the output gate; every subsequent operation on
//! the store fails with a clone of the original error.

mod alarm;
mod core;
mod flush;
mod state;
mod txn;

pub use self::alarm::AlarmHandle;
pub use self::core::{ActorStore, CommitFence, FlushWaiter};
pub use self::txn::Transaction;
