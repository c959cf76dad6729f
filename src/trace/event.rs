//! # Stream events and payload kinds.
//!
//! Every record on a trace stream is a [`StreamEvent`]: the session id, the
//! span it occurred in, a timestamp, a globally sequenced counter, and one of
//! twelve payload kinds. Sequence numbers order the whole stream regardless
//! of span, so the receiving end can reconstruct the exact emission order.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Final disposition of a trace session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Unknown,
    Ok,
    Canceled,
    ResponseStreamDisconnected,
    Exception,
    LoadShed,
    ExceededCpu,
    ExceededMemory,
    KillSwitch,
    DaemonDown,
    ScriptNotFound,
}

/// Disposition of a single span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanOutcome {
    Unknown,
    Ok,
    Canceled,
    Exception,
}

impl From<EventOutcome> for SpanOutcome {
    /// Mapping used when a session outcome cascades into its live spans.
    fn from(outcome: EventOutcome) -> Self {
        match outcome {
            EventOutcome::Ok => SpanOutcome::Ok,
            EventOutcome::Unknown => SpanOutcome::Unknown,
            EventOutcome::Canceled | EventOutcome::ResponseStreamDisconnected => {
                SpanOutcome::Canceled
            }
            EventOutcome::Exception
            | EventOutcome::LoadShed
            | EventOutcome::ExceededCpu
            | EventOutcome::ExceededMemory
            | EventOutcome::KillSwitch
            | EventOutcome::DaemonDown
            | EventOutcome::ScriptNotFound => SpanOutcome::Exception,
        }
    }
}

/// What triggered the traced work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventInfo {
    /// An incoming HTTP request.
    Fetch { method: String, url: String },
    /// An alarm delivery, carrying the scheduled time.
    Alarm { scheduled_time_ms: u64 },
    /// Anything else, named by the host.
    Custom { name: String },
}

/// Metadata describing the onset of a trace session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Onset {
    pub owner_id: Option<String>,
    pub script_name: Option<String>,
    pub script_version: Option<String>,
    pub dispatch_namespace: Option<String>,
    pub script_tags: Vec<String>,
    pub entrypoint: Option<String>,
    /// Trigger details; attached once via `set_event_info`.
    pub info: Option<EventInfo>,
}

/// Final session record, carrying resource totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome: EventOutcome,
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
}

/// The source observed sequence numbers in `[start, end)` that never reached
/// the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dropped {
    pub start: u32,
    pub end: u32,
}

/// Closes a span; emitted exactly once per span, after all its other events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanClose {
    pub outcome: SpanOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

/// Console-style log line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Log,
    Warn,
    Error,
}

/// A thrown error surfaced to the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Payload published on a diagnostics channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticChannelEvent {
    pub channel: String,
    pub message: Vec<u8>,
}

/// A named point-in-time marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub name: String,
}

/// One measured value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
}

/// An outbound call made by the traced work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subrequest {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<EventInfo>,
}

/// How a previously reported subrequest ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubrequestOutcome {
    pub id: u32,
    pub outcome: SpanOutcome,
}

/// Free-form key/value annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: TagValue,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

/// The tagged union of the twelve payload kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "payload")]
pub enum EventPayload {
    Onset(Onset),
    Outcome(Outcome),
    Dropped(Dropped),
    SpanClose(SpanClose),
    Log(Log),
    Exception(Exception),
    DiagnosticChannel(DiagnosticChannelEvent),
    Mark(Mark),
    Metrics(Vec<Metric>),
    Subrequest(Subrequest),
    SubrequestOutcome(SubrequestOutcome),
    Tags(Vec<Tag>),
}

/// The span an event occurred in. The root session is span 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRef {
    pub id: u32,
    pub parent: u32,
}

/// One record on the trace stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Session id shared by every event in the stream.
    pub id: String,
    pub span: SpanRef,
    /// Milliseconds since the Unix epoch. The wire field keeps its historical
    /// name; the unit has always been milliseconds in practice.
    #[serde(rename = "timestamp_ns")]
    pub timestamp_ms: u64,
    /// Strictly increasing across the whole stream, assigned at emission.
    pub sequence: u32,
    pub event: EventPayload,
}

/// Converts a wall-clock instant to the stream's millisecond representation.
/// Times before the epoch clamp to zero.
pub(crate) fn timestamp_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
