//! # Trace sessions and spans.
//!
//! A [`TraceSession`] is the root of a tree of spans and emits a globally
//! sequenced stream of [`StreamEvent`]s to a delegate sink. The session
//! itself is the root span, id 0; it opens with an `Onset` event and ends
//! with exactly one `Outcome` event, emitted implicitly (as `Unknown`) if the
//! session is dropped without one.
//!
//! Spans group events and nest. Closing a span, explicitly via
//! [`Span::set_outcome`] or implicitly on drop, first closes its live
//! children in insertion order, then emits the span's own `SpanClose`, so a
//! `SpanClose` appears exactly once per span and after every other event of
//! that span. After close, all event methods on the handle are silent no-ops.
//!
//! Ownership is arena-style: the session core owns span slots keyed by span
//! id; handles and parents hold ids, never pointers. The session and its
//! spans expect a single-threaded caller; the internal mutex exists for
//! exclusive access, not for cross-thread sharing of one stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::trace::event::{
    timestamp_ms, DiagnosticChannelEvent, Dropped, EventInfo, EventOutcome, EventPayload,
    Exception, Log, LogLevel, Mark, Metric, Onset, Outcome, SpanClose, SpanOutcome, SpanRef,
    StreamEvent, Subrequest, SubrequestOutcome, Tag,
};
use crate::trace::id::{IdFactory, SessionId};

/// Sink receiving every emitted event, synchronously and by value.
///
/// The delegate must be total: drop handling is reported through
/// [`TraceSession::add_dropped`] events, never through sink refusal.
pub type Delegate = Box<dyn FnMut(StreamEvent) + Send>;

struct SpanSlot {
    parent: u32,
    /// Live direct children, in creation order.
    children: Vec<u32>,
    /// Tags attached at creation, included with the closing event.
    tags: Vec<Tag>,
}

struct SessionCore {
    id: SessionId,
    onset: Onset,
    open: bool,
    delegate: Delegate,
    clock: Arc<dyn Clock>,
    span_counter: u32,
    sequence: u32,
    slots: HashMap<u32, SpanSlot>,
    /// Live direct children of the root, in creation order.
    root_children: Vec<u32>,
}

impl SessionCore {
    fn emit(&mut self, span: SpanRef, payload: EventPayload) {
        if !self.open {
            return;
        }
        let sequence = self.sequence;
        self.sequence += 1;
        let event = StreamEvent {
            id: self.id.as_str().to_string(),
            span,
            timestamp_ms: timestamp_ms(self.clock.now()),
            sequence,
            event: payload,
        };
        (self.delegate)(event);
    }

    fn require_info(&self) {
        assert!(
            self.onset.info.is_some(),
            "the event info must be set before other events"
        );
    }

    fn next_span_id(&mut self) -> u32 {
        self.span_counter += 1;
        self.span_counter
    }
}

/// Closes `id` and, first, all of its live children (insertion order,
/// recursively). A missing slot means the span already closed: no-op.
fn close_span(core: &mut SessionCore, id: u32, outcome: SpanOutcome, extra_tags: Vec<Tag>) {
    let Some(slot) = core.slots.remove(&id) else {
        return;
    };
    for child in &slot.children {
        close_span(core, *child, outcome, Vec::new());
    }
    if slot.parent == 0 {
        core.root_children.retain(|c| *c != id);
    } else if let Some(parent) = core.slots.get_mut(&slot.parent) {
        parent.children.retain(|c| *c != id);
    }
    let mut tags = slot.tags;
    tags.extend(extra_tags);
    core.emit(
        SpanRef {
            id,
            parent: slot.parent,
        },
        EventPayload::SpanClose(SpanClose { outcome, tags }),
    );
}

/// Root of one tail stream.
pub struct TraceSession {
    core: Arc<Mutex<SessionCore>>,
    id: SessionId,
}

impl TraceSession {
    /// Opens a session and immediately emits the `Onset` event (sequence 0)
    /// carrying `onset`.
    pub fn new(
        factory: &dyn IdFactory,
        onset: Onset,
        delegate: impl FnMut(StreamEvent) + Send + 'static,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let id = factory.new_id();
        let mut core = SessionCore {
            id: id.clone(),
            onset,
            open: true,
            delegate: Box::new(delegate),
            clock,
            span_counter: 0,
            sequence: 0,
            slots: HashMap::new(),
            root_children: Vec::new(),
        };
        let payload = EventPayload::Onset(core.onset.clone());
        core.emit(SpanRef::default(), payload);
        Self {
            core: Arc::new(Mutex::new(core)),
            id,
        }
    }

    /// The stream's correlation id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Attaches trigger details to the session's onset metadata.
    ///
    /// # Panics
    /// If called more than once, or after any event other than the `Onset`
    /// has been emitted.
    pub fn set_event_info(&self, info: EventInfo) {
        let mut core = self.core.lock().unwrap();
        assert!(
            core.onset.info.is_none(),
            "the onset event info can only be set once"
        );
        assert!(
            core.sequence == 1,
            "the event info must be set before other events"
        );
        core.onset.info = Some(info);
    }

    /// Opens a span under the root. Returns `None` once the session closed.
    pub fn new_child_span(&self, tags: Vec<Tag>) -> Option<Span> {
        let mut core = self.core.lock().unwrap();
        if !core.open {
            return None;
        }
        core.require_info();
        let id = core.next_span_id();
        core.slots.insert(
            id,
            SpanSlot {
                parent: 0,
                children: Vec::new(),
                tags,
            },
        );
        core.root_children.push(id);
        Some(Span {
            core: self.core.clone(),
            id,
        })
    }

    /// Records that events with sequence numbers in `[start, end)` were lost
    /// before reaching the sink. Itself a sequenced event.
    pub fn add_dropped(&self, start: u32, end: u32) {
        let mut core = self.core.lock().unwrap();
        if !core.open {
            return;
        }
        core.require_info();
        core.emit(
            SpanRef::default(),
            EventPayload::Dropped(Dropped { start, end }),
        );
    }

    /// Closes the stream with the given outcome. All live spans are closed
    /// first with the mapped span outcome; no events can be emitted after.
    pub fn set_outcome(&self, outcome: EventOutcome) {
        let mut core = self.core.lock().unwrap();
        close_session(&mut core, outcome);
    }
}

fn close_session(core: &mut SessionCore, outcome: EventOutcome) {
    if !core.open {
        return;
    }
    let span_outcome = SpanOutcome::from(outcome);
    let children = core.root_children.clone();
    for child in children {
        close_span(core, child, span_outcome, Vec::new());
    }
    debug_assert!(
        core.root_children.is_empty(),
        "all spans must be closed before the session is closed"
    );
    let payload = EventPayload::Outcome(Outcome {
        outcome,
        cpu_time_ms: core.clock.cpu_time().as_millis() as u64,
        wall_time_ms: core.clock.wall_time().as_millis() as u64,
    });
    core.emit(SpanRef::default(), payload);
    core.open = false;
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        // A poisoned lock means a contract-violation panic is already
        // unwinding; emitting nothing further is the only safe choice.
        let Ok(mut core) = self.core.lock() else {
            return;
        };
        close_session(&mut core, EventOutcome::Unknown);
    }
}

/// Handle to one live span.
///
/// Dropping the handle closes the span with an `Unknown` outcome if it has
/// not been closed already (by an explicit outcome, a parent's close, or the
/// session's).
pub struct Span {
    core: Arc<Mutex<SessionCore>>,
    id: u32,
}

impl Span {
    /// This span's id. Unique and monotonically assigned within the session.
    pub fn id(&self) -> u32 {
        self.id
    }

    fn add(&self, payload: EventPayload) {
        let mut core = self.core.lock().unwrap();
        let Some(parent) = core.slots.get(&self.id).map(|slot| slot.parent) else {
            return;
        };
        core.emit(
            SpanRef {
                id: self.id,
                parent,
            },
            payload,
        );
    }

    pub fn add_log(&self, level: LogLevel, message: impl Into<String>) {
        self.add(EventPayload::Log(Log {
            level,
            message: message.into(),
        }));
    }

    pub fn add_exception(&self, exception: Exception) {
        self.add(EventPayload::Exception(exception));
    }

    pub fn add_diagnostic_channel_event(&self, event: DiagnosticChannelEvent) {
        self.add(EventPayload::DiagnosticChannel(event));
    }

    pub fn add_mark(&self, name: impl Into<String>) {
        self.add(EventPayload::Mark(Mark { name: name.into() }));
    }

    pub fn add_metrics(&self, metrics: Vec<Metric>) {
        self.add(EventPayload::Metrics(metrics));
    }

    pub fn add_subrequest(&self, subrequest: Subrequest) {
        self.add(EventPayload::Subrequest(subrequest));
    }

    pub fn add_subrequest_outcome(&self, outcome: SubrequestOutcome) {
        self.add(EventPayload::SubrequestOutcome(outcome));
    }

    pub fn add_custom(&self, tags: Vec<Tag>) {
        self.add(EventPayload::Tags(tags));
    }

    /// Opens a nested span. Returns `None` if this span or the session has
    /// already closed.
    pub fn new_child_span(&self, tags: Vec<Tag>) -> Option<Span> {
        let mut core = self.core.lock().unwrap();
        if !core.open || !core.slots.contains_key(&self.id) {
            return None;
        }
        let id = core.next_span_id();
        core.slots.insert(
            id,
            SpanSlot {
                parent: self.id,
                children: Vec::new(),
                tags,
            },
        );
        core.slots
            .get_mut(&self.id)
            .expect("parent slot checked above")
            .children
            .push(id);
        Some(Span {
            core: self.core.clone(),
            id,
        })
    }

    /// Closes the span, cascading through live children first. The closing
    /// event carries the creation tags plus `tags`. A second close is a
    /// silent no-op.
    pub fn set_outcome(&self, outcome: SpanOutcome, tags: Vec<Tag>) {
        let mut core = self.core.lock().unwrap();
        close_span(&mut core, self.id, outcome, tags);
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        let Ok(mut core) = self.core.lock() else {
            return;
        };
        close_span(&mut core, self.id, SpanOutcome::Unknown, Vec::new());
    }
}
