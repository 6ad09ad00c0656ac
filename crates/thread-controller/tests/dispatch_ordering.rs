//! Integration tests for thread-affine dispatch.
//!
//! Drives a real `Client` over the mock page factory and verifies the
//! ordering, fairness and failure-isolation properties of the dispatcher,
//! pool and workers together.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tc_test_utils::{init_tracing, MockPageFactory, PageOp};
use thread_controller::config::Config;
use thread_controller::errors::TcError;
use thread_controller::Client;
use tokio::sync::oneshot;

// ============================================================================
// Helpers
// ============================================================================

fn test_config(worker_limit: usize) -> Config {
    let vars = HashMap::from([
        ("TC_WORKER_LIMIT".to_string(), worker_limit.to_string()),
        ("TC_INSTANCE_ID".to_string(), "tc-test".to_string()),
    ]);
    Config::from_vars(&vars).expect("test config loads")
}

fn test_client(worker_limit: usize, factory: Arc<MockPageFactory>) -> Arc<Client> {
    init_tracing();
    Arc::new(Client::new(test_config(worker_limit), factory))
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn recorded(log: &Log) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

/// Poll `condition` until it holds or five seconds pass.
async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

/// Poll the pool status until `predicate` holds or five seconds pass.
async fn wait_for_status<F>(client: &Client, predicate: F, what: &str)
where
    F: Fn(&thread_controller::actors::PoolStatus) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = client.status().await.expect("status responds");
            if predicate(&status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_per_thread_fifo_on_one_worker() {
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(1, Arc::clone(&factory));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    for tag in ["a1", "a2", "a3"] {
        let log = Arc::clone(&log);
        client
            .submit("thread-a", move |_page| async move {
                log.lock().unwrap().push(tag);
                Ok(())
            })
            .await
            .unwrap();
    }

    assert_eq!(recorded(&log), vec!["a1", "a2", "a3"]);
    assert_eq!(factory.pages_opened(), 1);
}

#[tokio::test]
async fn test_per_thread_fifo_across_rebinding() {
    // One worker serving two threads: A's actions stay ordered even though
    // the worker is rebound to B in between arrivals.
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(1, Arc::clone(&factory));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let submits: Vec<_> = [("A", "a1"), ("B", "b1"), ("A", "a2"), ("B", "b2")]
        .into_iter()
        .map(|(thread, tag)| {
            let client = Arc::clone(&client);
            let log = Arc::clone(&log);
            async move {
                client
                    .submit(thread, move |_page| async move {
                        log.lock().unwrap().push(tag);
                        Ok(())
                    })
                    .await
            }
        })
        .collect();

    let results = join_all(submits).await;
    assert!(results.iter().all(Result::is_ok));

    let entries = recorded(&log);
    let pos = |tag| entries.iter().position(|t| *t == tag).unwrap();
    assert!(pos("a1") < pos("a2"), "thread A stays FIFO: {entries:?}");
    assert!(pos("b1") < pos("b2"), "thread B stays FIFO: {entries:?}");

    // Everything ran on the single page.
    assert_eq!(factory.pages_opened(), 1);
}

#[tokio::test]
async fn test_cross_thread_independence() {
    // Thread A blocks on a gate; thread B must still make progress on its
    // own worker, and only then is A's gate released.
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(2, Arc::clone(&factory));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let (gate_tx, gate_rx) = oneshot::channel::<()>();

    let blocked = {
        let client = Arc::clone(&client);
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            client
                .submit("A", move |_page| async move {
                    let _ = gate_rx.await;
                    log.lock().unwrap().push("a1");
                    Ok(())
                })
                .await
        })
    };

    // B completes while A is still parked on the gate.
    let b_log = Arc::clone(&log);
    tokio::time::timeout(Duration::from_secs(5), async {
        client
            .submit("B", move |_page| async move {
                b_log.lock().unwrap().push("b1");
                Ok(())
            })
            .await
    })
    .await
    .expect("thread B must not be blocked by thread A")
    .unwrap();

    assert_eq!(recorded(&log), vec!["b1"]);

    gate_tx.send(()).unwrap();
    blocked.await.unwrap().unwrap();
    assert_eq!(recorded(&log), vec!["b1", "a1"]);
}

// ============================================================================
// Pool bound and fairness
// ============================================================================

#[tokio::test]
async fn test_pool_never_exceeds_worker_limit() {
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(2, Arc::clone(&factory));

    let submits: Vec<_> = (0..6)
        .map(|i| {
            let client = Arc::clone(&client);
            async move {
                client
                    .submit(&format!("thread-{i}"), |_page| async { Ok(()) })
                    .await
            }
        })
        .collect();

    let results = join_all(submits).await;
    assert!(results.iter().all(Result::is_ok));

    // Six threads were served by at most two pages.
    assert_eq!(factory.pages_opened(), 2);
    let navigations = factory.navigations();
    assert_eq!(navigations.len(), 6);

    let status = client.status().await.unwrap();
    assert_eq!(status.workers.len(), 2);
    assert_eq!(status.pending_actions, 0);
}

#[tokio::test]
async fn test_pending_threads_flush_in_arrival_order() {
    // worker_limit = 2. A and B occupy the two workers; C then D arrive and
    // must wait. When A's worker drains it serves C first, then D - before
    // any new thread would be admitted.
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(2, Arc::clone(&factory));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let (gate_a_tx, gate_a_rx) = oneshot::channel::<()>();
    let (gate_b_tx, gate_b_rx) = oneshot::channel::<()>();

    let submits = {
        let mut futures = Vec::new();
        for (thread, tag, gate) in [
            ("A", "a1", Some(gate_a_rx)),
            ("B", "b1", Some(gate_b_rx)),
            ("C", "c1", None),
            ("D", "d1", None),
        ] {
            let client = Arc::clone(&client);
            let log = Arc::clone(&log);
            futures.push(async move {
                client
                    .submit(thread, move |_page| async move {
                        if let Some(gate) = gate {
                            let _ = gate.await;
                        }
                        log.lock().unwrap().push(tag);
                        Ok(())
                    })
                    .await
            });
        }
        tokio::spawn(join_all(futures))
    };

    // C and D are parked while A and B hold the workers.
    wait_for_status(
        &client,
        |status| status.pending_threads == 2,
        "C and D to be parked",
    )
    .await;

    // Free A's worker; C (earlier arrival) must get it first, then D.
    gate_a_tx.send(()).unwrap();

    wait_for(
        || recorded(&log).contains(&"d1"),
        "pending threads to flush",
    )
    .await;

    gate_b_tx.send(()).unwrap();
    let results = submits.await.unwrap();
    assert!(results.iter().all(Result::is_ok));

    // a1 ran, then C and D reused A's page in arrival order.
    let navigations = factory.navigations();
    assert_eq!(navigations.len(), 4);
    let page_for_a = navigations[0].0;
    assert_eq!(navigations[0].1, "A");
    assert_eq!(navigations[1].1, "B");
    assert_eq!(navigations[2], (page_for_a, "C".to_string()));
    assert_eq!(navigations[3], (page_for_a, "D".to_string()));

    let entries = recorded(&log);
    let pos = |tag| entries.iter().position(|t| *t == tag).unwrap();
    assert!(pos("a1") < pos("c1"));
    assert!(pos("c1") < pos("d1"));
}

// ============================================================================
// Failure semantics
// ============================================================================

#[tokio::test]
async fn test_invalid_target_is_synchronous() {
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(1, Arc::clone(&factory));

    let result = client.submit("", |_page| async { Ok(()) }).await;
    assert!(matches!(result, Err(TcError::InvalidTarget)));

    let result = client.submit("   ", |_page| async { Ok(()) }).await;
    assert!(matches!(result, Err(TcError::InvalidTarget)));

    assert_eq!(factory.pages_opened(), 0);
}

#[tokio::test]
async fn test_navigation_failure_fails_every_waiting_action() {
    let factory = Arc::new(MockPageFactory::new().with_failing_thread("dead"));
    let client = test_client(2, Arc::clone(&factory));

    let submits: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            async move { client.submit("dead", |_page| async { Ok(()) }).await }
        })
        .collect();

    for result in join_all(submits).await {
        assert!(
            matches!(&result, Err(TcError::Navigation(_))),
            "every action on the failed binding gets the navigation error, got {result:?}"
        );
    }

    // The pool is not poisoned: a healthy thread still works.
    client
        .submit("alive", |_page| async { Ok(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_operation_failure_is_isolated() {
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(1, Arc::clone(&factory));
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let failing = {
        let client = Arc::clone(&client);
        async move {
            client
                .submit("A", |_page| async {
                    Err(TcError::Operation("control missing".to_string()))
                })
                .await
        }
    };
    let succeeding = {
        let client = Arc::clone(&client);
        let log = Arc::clone(&log);
        async move {
            client
                .submit("A", move |_page| async move {
                    log.lock().unwrap().push("survivor");
                    Ok(())
                })
                .await
        }
    };

    let (first, second) = tokio::join!(failing, succeeding);
    assert!(matches!(first, Err(TcError::Operation(_))));
    assert!(second.is_ok());
    assert_eq!(recorded(&log), vec!["survivor"]);
}

#[tokio::test]
async fn test_action_timeout_is_enforced() {
    let factory = Arc::new(MockPageFactory::new());
    init_tracing();
    let mut config = test_config(1);
    config.action_timeout = Some(Duration::from_millis(100));
    let client = Arc::new(Client::new(config, factory));

    let result = client
        .submit("A", |_page| async {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(TcError::ActionTimeout(_))));

    // The worker survives the abandoned action.
    client.submit("A", |_page| async { Ok(()) }).await.unwrap();
}

#[tokio::test]
async fn test_page_open_failure_fails_the_action() {
    let factory = Arc::new(MockPageFactory::new());
    factory.fail_open("browser unavailable");
    let client = test_client(1, Arc::clone(&factory));

    let result = client.submit("A", |_page| async { Ok(()) }).await;
    assert!(result.is_err());
    assert_eq!(factory.pages_opened(), 0);
}

// ============================================================================
// Alias affinity
// ============================================================================

#[tokio::test]
async fn test_vanity_handle_reuses_canonical_worker() {
    let factory = Arc::new(MockPageFactory::new().with_vanity("jane.doe", "1234567890"));
    let client = test_client(2, Arc::clone(&factory));

    client
        .submit("jane.doe", |_page| async { Ok(()) })
        .await
        .unwrap();

    // The dispatcher learns the canonical id from the navigation outcome.
    wait_for_status(
        &client,
        |status| {
            status
                .workers
                .iter()
                .any(|w| w.bound.as_deref() == Some("1234567890"))
        },
        "alias to be learned",
    )
    .await;

    // Both the canonical id and the vanity handle land on the same page.
    client
        .submit("1234567890", |_page| async { Ok(()) })
        .await
        .unwrap();
    client
        .submit("jane.doe", |_page| async { Ok(()) })
        .await
        .unwrap();

    assert_eq!(factory.pages_opened(), 1);
    assert_eq!(factory.navigations().len(), 1, "no repeat navigation");
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(1, Arc::clone(&factory));

    client.submit("A", |_page| async { Ok(()) }).await.unwrap();
    client.shutdown().await.unwrap();

    let result = client.submit("A", |_page| async { Ok(()) }).await;
    assert!(result.is_err(), "submissions after shutdown must fail");
}

// ============================================================================
// Recorded operations sanity
// ============================================================================

#[tokio::test]
async fn test_send_message_types_then_presses_enter() {
    let factory = Arc::new(MockPageFactory::new());
    let client = test_client(1, Arc::clone(&factory));

    client.send_message("A", "hello there").await.unwrap();

    let ops: Vec<PageOp> = factory.recorded().into_iter().map(|(_, op)| op).collect();
    assert!(matches!(&ops[0], PageOp::Navigate { thread } if thread == "A"));
    assert!(matches!(&ops[1], PageOp::Type { text, .. } if text == "hello there"));
    assert!(matches!(&ops[2], PageOp::Press { key } if key == "Enter"));
}
