//! Output gate behavior: serial result publication, drain waits, and the
//! latched broken state.

mod common;

use std::sync::{Arc, Mutex};

use actorgate::{OutputGate, StoreError};
use common::Harness;
use futures::FutureExt;
use tokio::sync::oneshot;

async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

fn storage_error(reason: &str) -> StoreError {
    StoreError::Storage {
        reason: reason.into(),
    }
}

#[tokio::test]
async fn results_publish_in_slot_order() {
    let gate = OutputGate::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let (a_tx, a_rx) = oneshot::channel::<()>();
    let (b_tx, b_rx) = oneshot::channel::<()>();

    let log_a = log.clone();
    let gate_a = gate.clone();
    let task_a = tokio::spawn(async move {
        gate_a
            .lock_while(async move {
                let _ = a_rx.await;
                Ok(())
            })
            .await
            .unwrap();
        log_a.lock().unwrap().push("a");
    });

    settle().await;
    let log_b = log.clone();
    let gate_b = gate.clone();
    let task_b = tokio::spawn(async move {
        gate_b
            .lock_while(async move {
                let _ = b_rx.await;
                Ok(())
            })
            .await
            .unwrap();
        log_b.lock().unwrap().push("b");
    });

    // B's producer finishes first, but its result waits for A's slot.
    b_tx.send(()).unwrap();
    settle().await;
    assert!(log.lock().unwrap().is_empty());

    a_tx.send(()).unwrap();
    settle().await;
    assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);

    task_a.await.unwrap();
    task_b.await.unwrap();
}

#[tokio::test]
async fn wait_resolves_when_enqueued_work_drains() {
    let gate = OutputGate::new();
    let (tx, rx) = oneshot::channel::<()>();

    let gate_p = gate.clone();
    tokio::spawn(async move {
        let _ = gate_p
            .lock_while(async move {
                let _ = rx.await;
                Ok(())
            })
            .await;
    });
    settle().await;

    let gate_w = gate.clone();
    let mut waiter = tokio::spawn(async move { gate_w.wait().await });
    settle().await;
    assert!((&mut waiter).now_or_never().is_none());

    tx.send(()).unwrap();
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn wait_on_an_idle_gate_is_immediate() {
    let gate = OutputGate::new();
    gate.wait().await.unwrap();
}

#[tokio::test]
async fn first_failure_is_latched_and_later_failures_ignored() {
    let gate = OutputGate::new();
    let first = storage_error("first_failure");
    let second = storage_error("second_failure");

    let err = gate
        .lock_while::<(), _>(async { Err(first.clone()) })
        .await
        .unwrap_err();
    assert_eq!(err, first);

    // A distinct later failure does not overwrite the latched error.
    let err = gate
        .lock_while::<(), _>(async { Err(second) })
        .await
        .unwrap_err();
    assert_eq!(err, first);

    assert_eq!(gate.wait().await.unwrap_err(), first);
    assert_eq!(
        gate.lock_while(async { Ok(42) }).await.unwrap_err(),
        first,
        "results after breakage are replaced by the latched error"
    );
    assert_eq!(gate.on_broken().await, first);
}

#[tokio::test]
async fn on_broken_resolves_for_subscribers_registered_before_failure() {
    let gate = OutputGate::new();
    let expected = storage_error("late_failure");

    let gate_obs = gate.clone();
    let observer = tokio::spawn(async move { gate_obs.on_broken().await });
    settle().await;

    let _ = gate
        .lock_while::<(), _>(async { Err(expected.clone()) })
        .await;
    assert_eq!(observer.await.unwrap(), expected);
}

#[tokio::test]
async fn in_flight_wait_fails_when_gate_breaks() {
    let gate = OutputGate::new();
    let (tx, rx) = oneshot::channel::<Result<(), StoreError>>();

    let gate_p = gate.clone();
    tokio::spawn(async move {
        let _ = gate_p
            .lock_while(async move {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Ok(()),
                }
            })
            .await;
    });
    settle().await;

    let gate_w = gate.clone();
    let waiter = tokio::spawn(async move { gate_w.wait().await });
    settle().await;

    let expected = storage_error("mid_wait_failure");
    tx.send(Err(expected.clone())).unwrap();
    assert_eq!(waiter.await.unwrap().unwrap_err(), expected);
}

// The store surfaces the gate's latched error on every operation; detection
// is allowed to be asynchronous but must be reliable once the failing task
// has run.
#[tokio::test]
async fn store_operations_fail_once_gate_latches() {
    let h = Harness::new();
    h.store.put(b"k", b"v").unwrap();
    h.reject_commits(1, "latched").await;
    h.expect_calls(&["commit"]);

    let expected = StoreError::CommitFailed {
        reason: "latched".into(),
    };
    assert_eq!(h.gate.broken(), Some(expected.clone()));
    assert_eq!(h.store.put(b"k2", b"v2").unwrap_err(), expected);
    assert_eq!(h.store.on_no_pending_flush().await.unwrap_err(), expected);
}
