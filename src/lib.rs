//! # actorgate
//!
//! **Actorgate** coordinates durable state for single-writer actors.
//!
//! It combines key/value storage and at most one alarm behind an output
//! gate, batching writes into atomic commits and ordering local durability
//! against an external alarm scheduler. A loosely coupled streaming-trace
//! module provides a span-structured, globally sequenced event stream for
//! observing the actor's work.
//!
//! ## Features
//!
//! | Area             | Description                                                            | Key types / traits                        |
//! |------------------|------------------------------------------------------------------------|-------------------------------------------|
//! | **Output gate**  | FIFO barrier for observable effects with a latched broken state.       | [`OutputGate`]                            |
//! | **Coordinator**  | Atomic write batches, alarm get/set, handler arming, transactions.     | [`ActorStore`], [`Transaction`], [`AlarmHandle`] |
//! | **Capabilities** | Pluggable database, scheduler, commit fence, and clock seams.          | [`Database`], [`Scheduler`], [`Clock`]    |
//! | **Storage**      | In-memory reference engine with full savepoint support.                | [`MemDb`]                                 |
//! | **Tracing**      | Append-only event stream with nested spans and outcomes.               | [`TraceSession`], [`Span`], [`StreamEvent`] |
//! | **Errors**       | One cloneable error enum, preserved verbatim once the gate breaks.     | [`StoreError`]                            |
//!
//! ## Ordering at a glance
//!
//! Alarms moved **earlier** are acknowledged by the scheduler before the
//! local commit (the scheduler must never hold a time a crash could reveal
//! to be absent from storage); alarms moved **later** or cleared commit
//! first and notify the scheduler afterwards (a spurious fire is harmless;
//! the arming check cancels it). Overlapping earlier-moving updates coalesce
//! into one commit.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::{Duration, SystemTime, UNIX_EPOCH};
//!
//! use actorgate::{ActorStore, MemDb, OutputGate, Scheduler, StoreError};
//! use async_trait::async_trait;
//!
//! struct NoopScheduler;
//!
//! #[async_trait]
//! impl Scheduler for NoopScheduler {
//!     async fn schedule_run(&self, _time: Option<SystemTime>) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), StoreError> {
//!     let gate = OutputGate::new();
//!     let store = ActorStore::new(
//!         Arc::new(MemDb::new()),
//!         gate.clone(),
//!         Box::new(|| Box::pin(async { Ok(()) })),
//!         Arc::new(NoopScheduler),
//!     )?;
//!
//!     store.put(b"greeting", b"hello")?;
//!     store.set_alarm(Some(UNIX_EPOCH + Duration::from_secs(60)))?.await?;
//!     assert_eq!(store.get(b"greeting").await?, Some(b"hello".to_vec()));
//!     Ok(())
//! }
//! ```

mod clock;
mod db;
mod error;
mod gate;
mod sched;
mod store;
mod trace;

// ---- Public re-exports ----

pub use clock::{Clock, SystemClock};
pub use db::{Database, MemDb};
pub use error::StoreError;
pub use gate::OutputGate;
pub use sched::Scheduler;
pub use store::{ActorStore, AlarmHandle, CommitFence, FlushWaiter, Transaction};
pub use trace::{
    DiagnosticChannelEvent, Dropped, EventInfo, EventOutcome, EventPayload, Exception, IdFactory,
    Log, LogLevel, Mark, Metric, Onset, Outcome, SessionId, Span, SpanClose, SpanOutcome, SpanRef,
    StreamEvent, Subrequest, SubrequestOutcome, Tag, TagValue, TraceSession, UuidIdFactory,
};
