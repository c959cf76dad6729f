//! Coordinator state shared by the facade, the flush tasks, and the
//! transaction handles.
//!
//! All mutation happens under one mutex that is never held across an await;
//! the store assumes a single actor-local event loop and uses the lock only
//! to keep the compiler honest about exclusive access.

use std::time::SystemTime;

use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

use crate::error::StoreError;

/// An alarm value: `None` means "no alarm".
pub(crate) type AlarmTime = Option<SystemTime>;

/// Completion signal handed to callers awaiting a flush.
pub(crate) type Waiter = oneshot::Sender<Result<(), StoreError>>;

/// Chained completion of a predecessor flush phase.
pub(crate) type PhaseDone = Shared<BoxFuture<'static, ()>>;

/// Lifecycle of the alarm-handler arming token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandlerState {
    /// No handler is running.
    Idle,
    /// A handler token is live.
    Armed {
        /// The committed alarm time the handler was armed for.
        fire_time: SystemTime,
        /// Whether dropping the token should clear the alarm.
        deferred_delete: bool,
        /// Whether the handler has staged its own alarm change.
        dirty: bool,
    },
    /// The token was dropped without writes; the deferred deletion is being
    /// committed. Returns to `Idle` when that commit resolves.
    Deleting,
}

/// One open explicit transaction level.
pub(crate) struct TxnLevel {
    /// Depth used in the savepoint name; frozen when the level opens.
    pub name_depth: usize,
    /// Alarm change staged at this level, if any.
    pub staged_alarm: Option<AlarmTime>,
    /// Whether anything (writes or alarm) was staged at this level.
    pub dirty: bool,
}

pub(crate) struct State {
    /// Last durable alarm value, equal to committed storage.
    pub committed_alarm: AlarmTime,
    /// Staged-but-uncommitted alarm change. The outer `Option` distinguishes
    /// "no pending change" from "pending change to none".
    pub pending_alarm: Option<AlarmTime>,
    /// The value the scheduler most recently acknowledged.
    pub scheduled_alarm: AlarmTime,
    pub handler: HandlerState,
    /// Terminal error recorded by `shutdown()`.
    pub shutdown: Option<StoreError>,
    /// True while the coordinator holds the root savepoint open.
    pub implicit_open: bool,
    /// Open explicit transactions, outermost first.
    pub levels: Vec<TxnLevel>,
    /// True while a spawned flush task has not yet captured the staged batch.
    pub flush_armed: bool,
    /// Callers awaiting the next captured commit.
    pub waiters: Vec<Waiter>,
    /// Database-release completion of the most recent flush.
    pub sync_tail: Option<PhaseDone>,
    /// Scheduler-notification completion of the most recent flush.
    pub sched_tail: Option<PhaseDone>,
}

impl State {
    pub fn new() -> Self {
        Self {
            committed_alarm: None,
            pending_alarm: None,
            scheduled_alarm: None,
            handler: HandlerState::Idle,
            shutdown: None,
            implicit_open: false,
            levels: Vec::new(),
            flush_armed: false,
            waiters: Vec::new(),
            sync_tail: None,
            sched_tail: None,
        }
    }

    /// The alarm value a caller would observe if everything staged committed:
    /// innermost transaction staging first, then the pending change, then the
    /// committed value. While a handler is armed and its deferred deletion is
    /// still in force, the alarm reads as cleared so the handler does not see
    /// the alarm it is about to delete.
    pub fn effective_alarm(&self) -> AlarmTime {
        for level in self.levels.iter().rev() {
            if let Some(staged) = level.staged_alarm {
                return staged;
            }
        }
        if let HandlerState::Armed {
            deferred_delete: true,
            dirty: false,
            ..
        } = self.handler
        {
            return None;
        }
        self.pending_alarm.unwrap_or(self.committed_alarm)
    }

    /// True when the staged value must reach the scheduler before the local
    /// commit: the scheduler must never fire an alarm that a crash could
    /// reveal to be absent from storage.
    pub fn needs_schedule_prelude(&self) -> bool {
        match self.pending_alarm {
            Some(new) => is_earlier(new, self.scheduled_alarm),
            None => false,
        }
    }
}

/// Whether `new` moves the alarm earlier than what the scheduler knows.
/// An alarm appearing where none was scheduled counts as earlier; clearing
/// never does.
pub(crate) fn is_earlier(new: AlarmTime, scheduled: AlarmTime) -> bool {
    match (new, scheduled) {
        (Some(_), None) => true,
        (Some(n), Some(s)) => n < s,
        (None, _) => false,
    }
}

/// Savepoint name for the given nesting depth. Depth 0 is the root savepoint
/// of an implicit transaction.
pub(crate) fn savepoint_name(depth: usize) -> String {
    format!("_cf_savepoint_{depth}")
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn ms(n: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(n)
    }

    #[test]
    fn direction_rules() {
        assert!(is_earlier(Some(ms(1)), None));
        assert!(is_earlier(Some(ms(1)), Some(ms(2))));
        assert!(!is_earlier(Some(ms(2)), Some(ms(1))));
        assert!(!is_earlier(Some(ms(1)), Some(ms(1))));
        assert!(!is_earlier(None, Some(ms(1))));
        assert!(!is_earlier(None, None));
    }

    #[test]
    fn armed_handler_masks_alarm() {
        let mut st = State::new();
        st.committed_alarm = Some(ms(1));
        assert_eq!(st.effective_alarm(), Some(ms(1)));

        st.handler = HandlerState::Armed {
            fire_time: ms(1),
            deferred_delete: true,
            dirty: false,
        };
        assert_eq!(st.effective_alarm(), None);

        // A staged change during the handler is visible again.
        st.handler = HandlerState::Armed {
            fire_time: ms(1),
            deferred_delete: false,
            dirty: true,
        };
        st.pending_alarm = Some(Some(ms(2)));
        assert_eq!(st.effective_alarm(), Some(ms(2)));
    }
}
