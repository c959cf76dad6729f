//! Trace session identifiers.
//!
//! A [`SessionId`] correlates every event in one tail stream. Uniqueness
//! needs to hold at a fairly large scale but not globally; the requirements
//! differ per environment, so generation sits behind the [`IdFactory`]
//! capability. Callers that want a shared factory pass a shared reference;
//! there is no process-wide singleton.

use std::fmt;

use uuid::Uuid;

/// Opaque correlation key for one trace session.
///
/// Applications should treat the contents as opaque; any string shape is
/// allowed, equality is by value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing string as a session id.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability for minting session ids.
pub trait IdFactory: Send + Sync {
    /// Produces a fresh id for a new session.
    fn new_id(&self) -> SessionId;
}

/// [`IdFactory`] producing random UUID v4 ids.
///
/// The production-expected variant; suitable for local development and
/// standalone deployments.
pub struct UuidIdFactory;

impl IdFactory for UuidIdFactory {
    fn new_id(&self) -> SessionId {
        SessionId(Uuid::new_v4().to_string())
    }
}
