//! Shared harness for the coordinator suites.
//!
//! Mirrors the shape of the original fixture: a recorded call log
//! (`"scheduleRun(1ms)"`, `"commit"`, ...), a commit fence the test resolves
//! or rejects by hand, and a scheduler that either acknowledges immediately
//! or waits for the test to fulfill each call.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use actorgate::{ActorStore, Database, MemDb, OutputGate, Scheduler, StoreError};
use async_trait::async_trait;
use tokio::sync::oneshot;

pub fn ms(n: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(n)
}

pub fn fmt_time(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => format!(
            "{}ms",
            t.duration_since(UNIX_EPOCH).expect("post-epoch").as_millis()
        ),
        None => "none".to_string(),
    }
}

type Fulfiller = oneshot::Sender<Result<(), StoreError>>;
type ScheduleHook = Box<dyn Fn(Option<SystemTime>) + Send + Sync>;

struct MockScheduler {
    calls: Arc<Mutex<Vec<String>>>,
    auto: bool,
    fulfillers: Arc<Mutex<Vec<Fulfiller>>>,
    hook: Arc<Mutex<Option<ScheduleHook>>>,
}

#[async_trait]
impl Scheduler for MockScheduler {
    async fn schedule_run(&self, time: Option<SystemTime>) -> Result<(), StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("scheduleRun({})", fmt_time(time)));
        if let Some(hook) = &*self.hook.lock().unwrap() {
            hook(time);
        }
        if self.auto {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.fulfillers.lock().unwrap().push(tx);
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(StoreError::SchedulerRejected {
                reason: "scheduler dropped".into(),
            }),
        }
    }
}

pub struct Harness {
    pub db: Arc<MemDb>,
    pub gate: OutputGate,
    pub store: ActorStore,
    calls: Arc<Mutex<Vec<String>>>,
    commits: Arc<Mutex<Vec<Fulfiller>>>,
    schedules: Arc<Mutex<Vec<Fulfiller>>>,
    hook: Arc<Mutex<Option<ScheduleHook>>>,
}

impl Harness {
    /// Scheduler acknowledges immediately; no seeded alarm.
    pub fn new() -> Self {
        Self::build(true, None)
    }

    /// Every `schedule_run` waits for `resolve_schedules`/`reject_schedules`.
    pub fn manual() -> Self {
        Self::build(false, None)
    }

    /// Manual scheduler plus an alarm already durable (and presumed
    /// acknowledged) before the store starts.
    pub fn manual_seeded(alarm: SystemTime) -> Self {
        Self::build(false, Some(alarm))
    }

    fn build(auto: bool, seed: Option<SystemTime>) -> Self {
        let db = Arc::new(MemDb::new());
        if let Some(alarm) = seed {
            db.write_alarm(Some(alarm)).expect("seed alarm");
        }
        let gate = OutputGate::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let commits: Arc<Mutex<Vec<Fulfiller>>> = Arc::new(Mutex::new(Vec::new()));
        let schedules: Arc<Mutex<Vec<Fulfiller>>> = Arc::new(Mutex::new(Vec::new()));
        let hook: Arc<Mutex<Option<ScheduleHook>>> = Arc::new(Mutex::new(None));

        let fence_calls = calls.clone();
        let fence_commits = commits.clone();
        let fence: actorgate::CommitFence = Box::new(move || {
            fence_calls.lock().unwrap().push("commit".to_string());
            let (tx, rx) = oneshot::channel();
            fence_commits.lock().unwrap().push(tx);
            Box::pin(async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::CommitFailed {
                        reason: "fence dropped".into(),
                    }),
                }
            })
        });

        let scheduler = Arc::new(MockScheduler {
            calls: calls.clone(),
            auto,
            fulfillers: schedules.clone(),
            hook: hook.clone(),
        });

        let store = ActorStore::new(db.clone(), gate.clone(), fence, scheduler)
            .expect("store construction");

        Self {
            db,
            gate,
            store,
            calls,
            commits,
            schedules,
            hook,
        }
    }

    /// Runs a callback inside every `schedule_run` invocation, before the
    /// call resolves. Used to observe database state mid-call.
    pub fn set_schedule_hook(&self, hook: impl Fn(Option<SystemTime>) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Lets every spawned task run until the loop is quiescent.
    pub async fn settle(&self) {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    /// Settles, asserts exactly `expected` commit fences are pending, and
    /// resolves them all.
    pub async fn resolve_commits(&self, expected: usize) {
        self.settle().await;
        let pending: Vec<Fulfiller> = {
            let mut commits = self.commits.lock().unwrap();
            assert_eq!(commits.len(), expected, "pending commit fences");
            commits.drain(..).collect()
        };
        for fulfiller in pending {
            let _ = fulfiller.send(Ok(()));
        }
        self.settle().await;
    }

    /// Settles, asserts exactly `expected` commit fences are pending, and
    /// rejects them all with `reason`.
    pub async fn reject_commits(&self, expected: usize, reason: &str) {
        self.settle().await;
        let pending: Vec<Fulfiller> = {
            let mut commits = self.commits.lock().unwrap();
            assert_eq!(commits.len(), expected, "pending commit fences");
            commits.drain(..).collect()
        };
        for fulfiller in pending {
            let _ = fulfiller.send(Err(StoreError::CommitFailed {
                reason: reason.to_string(),
            }));
        }
        self.settle().await;
    }

    /// Settles, asserts exactly `expected` scheduler calls are in flight,
    /// and acknowledges them.
    pub async fn resolve_schedules(&self, expected: usize) {
        self.settle().await;
        let pending: Vec<Fulfiller> = {
            let mut schedules = self.schedules.lock().unwrap();
            assert_eq!(schedules.len(), expected, "in-flight scheduler calls");
            schedules.drain(..).collect()
        };
        for fulfiller in pending {
            let _ = fulfiller.send(Ok(()));
        }
        self.settle().await;
    }

    /// Settles, asserts exactly `expected` scheduler calls are in flight,
    /// and rejects them with `reason`.
    pub async fn reject_schedules(&self, expected: usize, reason: &str) {
        self.settle().await;
        let pending: Vec<Fulfiller> = {
            let mut schedules = self.schedules.lock().unwrap();
            assert_eq!(schedules.len(), expected, "in-flight scheduler calls");
            schedules.drain(..).collect()
        };
        for fulfiller in pending {
            let _ = fulfiller.send(Err(StoreError::SchedulerRejected {
                reason: reason.to_string(),
            }));
        }
        self.settle().await;
    }

    /// Asserts the recorded external calls since the last check, in order.
    pub fn expect_calls(&self, expected: &[&str]) {
        let recorded: Vec<String> = self.calls.lock().unwrap().drain(..).collect();
        let expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        assert_eq!(recorded, expected, "external call log");
    }
}
