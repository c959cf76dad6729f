//! # Alarm-handler arming token.
//!
//! [`AlarmHandle`] is returned by
//! [`ActorStore::arm_alarm_handler`](crate::ActorStore::arm_alarm_handler)
//! and represents a running alarm handler. Dropping it decides the alarm's
//! fate:
//!
//! - handler staged its own alarm change: the staged value wins, the change
//!   commits with standard coupling;
//! - no writes and deletion not canceled: the fired alarm is cleared
//!   (deferred deletion), committed with standard coupling;
//! - deletion canceled via
//!   [`cancel_deferred_alarm_deletion`](crate::ActorStore::cancel_deferred_alarm_deletion):
//!   the previous alarm stays intact.
//!
//! The deletion is "deferred" so that a handler that crashes before
//! completing leaves the alarm durable, preserving at-least-once delivery.

use std::sync::Arc;

use tracing::warn;

use crate::store::core::StoreInner;
use crate::store::state::{savepoint_name, HandlerState};

/// Token held while an alarm handler runs. Drop it to complete the handler.
pub struct AlarmHandle {
    inner: Arc<StoreInner>,
}

impl AlarmHandle {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }
}

impl Drop for AlarmHandle {
    fn drop(&mut self) {
        let inner = &self.inner;
        let mut st = inner.state.lock().unwrap();
        match st.handler {
            HandlerState::Armed {
                deferred_delete: true,
                dirty: false,
                ..
            } => {
                // Stage the deletion; handler state returns to idle only
                // once the commit carrying it resolves.
                st.handler = HandlerState::Deleting;
                if let Some(level) = st.levels.last_mut() {
                    level.staged_alarm = Some(None);
                    level.dirty = true;
                    if let Err(e) = inner.db.write_alarm(None) {
                        warn!(error = %e, "failed to stage deferred alarm deletion");
                        inner.gate.break_with(e);
                    }
                    return;
                }
                if !st.implicit_open {
                    if let Err(e) = inner.db.savepoint(&savepoint_name(0)) {
                        warn!(error = %e, "failed to open transaction for deferred alarm deletion");
                        inner.gate.break_with(e);
                        return;
                    }
                    st.implicit_open = true;
                }
                if let Err(e) = inner.db.write_alarm(None) {
                    warn!(error = %e, "failed to stage deferred alarm deletion");
                    inner.gate.break_with(e);
                    return;
                }
                st.pending_alarm = Some(None);
                inner.arm_flush(&mut st);
            }
            HandlerState::Armed { .. } => {
                // Dirty or deletion canceled: the staged value (or the
                // untouched previous value) already has whatever flush it
                // needs.
                st.handler = HandlerState::Idle;
            }
            HandlerState::Idle | HandlerState::Deleting => {}
        }
    }
}
