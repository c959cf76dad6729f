//! Time source abstraction for trace sessions.
//!
//! [`Clock`] decouples event timestamping from the host environment so tests
//! can pin time to a fixed value. The production implementation is
//! [`SystemClock`].

use std::time::{Duration, Instant, SystemTime};

/// Provides the current time plus the cpu/wall totals reported in a trace
/// session's final outcome record.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, used to stamp every emitted event.
    fn now(&self) -> SystemTime;

    /// Total cpu time consumed so far, reported on the outcome record.
    fn cpu_time(&self) -> Duration {
        Duration::ZERO
    }

    /// Total wall time elapsed so far, reported on the outcome record.
    fn wall_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// [`Clock`] backed by the operating system.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    /// Creates a clock whose wall-time total starts counting now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn wall_time(&self) -> Duration {
        self.started.elapsed()
    }
}
