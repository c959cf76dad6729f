//! # Streaming trace: an append-only, span-structured event bus.
//!
//! The model is built around spans: logical groupings of events that nest,
//! carry outcomes, and always belong to one session. The session is the root
//! span (id 0); it opens with an `Onset` event carrying metadata about the
//! traced work and ends with an `Outcome` event carrying its final
//! disposition. All events in between (logs, exceptions, marks, metrics,
//! subrequests, custom tags) are sequenced by one counter across the whole
//! stream.
//!
//! ## Files & responsibilities
//! - **session.rs**: [`TraceSession`]/[`Span`] lifecycle, the span-closing
//!   cascade, sequence assignment.
//! - **event.rs**: [`StreamEvent`], the twelve payload kinds, and the
//!   outcome mapping used by the cascade.
//! - **id.rs**: opaque [`SessionId`] and the [`IdFactory`] capability.
//!
//! ## Example stream
//! ```text
//! span 0 · seq 0 · Onset
//! span 1 · seq 1 · Log            (child of root)
//! span 2 · seq 2 · Mark           (child of span 1)
//! span 2 · seq 3 · SpanClose(ok)
//! span 1 · seq 4 · SpanClose(ok)
//! span 0 · seq 5 · Outcome(ok)
//! ```

mod event;
mod id;
mod session;

pub use event::{
    DiagnosticChannelEvent, Dropped, EventInfo, EventOutcome, EventPayload, Exception, Log,
    LogLevel, Mark, Metric, Onset, Outcome, SpanClose, SpanOutcome, SpanRef, StreamEvent,
    Subrequest, SubrequestOutcome, Tag, TagValue,
};
pub use id::{IdFactory, SessionId, UuidIdFactory};
pub use session::{Delegate, Span, TraceSession};
