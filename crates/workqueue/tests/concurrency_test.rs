//! Concurrency tests for the work queue
//!
//! Many producers hammer a handful of keys while several workers drain the
//! queue on a multi-threaded runtime. No key may ever be held by two workers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workqueue::WorkQueue;

const KEYS: [&str; 4] = ["default/a", "default/b", "other/a", "other/c"];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_key_is_processed_concurrently() {
    let queue: WorkQueue<String> = WorkQueue::new("concurrency");
    let in_flight: Arc<Mutex<HashSet<String>>> = Arc::default();
    let violations = Arc::new(AtomicUsize::new(0));
    let processed = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let queue = queue.clone();
            let in_flight = Arc::clone(&in_flight);
            let violations = Arc::clone(&violations);
            let processed = Arc::clone(&processed);
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    if !in_flight.lock().unwrap().insert(key.clone()) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    in_flight.lock().unwrap().remove(&key);
                    processed.fetch_add(1, Ordering::SeqCst);
                    queue.forget(&key);
                    queue.done(&key);
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for round in 0..200 {
                    queue.add(KEYS[round % KEYS.len()].to_string());
                    if round % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    for producer in futures::future::join_all(producers).await {
        producer.unwrap();
    }

    // Let the workers drain whatever the producers left behind
    tokio::time::timeout(Duration::from_secs(10), async {
        while !queue.is_empty() || !in_flight.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    queue.shut_down();
    for worker in futures::future::join_all(workers).await {
        worker.unwrap();
    }

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    // Deduplication collapses the 800 adds into far fewer runs
    let runs = processed.load(Ordering::SeqCst);
    assert!(runs >= KEYS.len(), "every key is processed at least once, got {runs}");
    assert!(runs < 800, "adds for pending keys must be collapsed, got {runs}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_key_added_during_processing_runs_again_after_done() {
    let queue: WorkQueue<String> = WorkQueue::new("requeue");
    queue.add("default/a".to_string());

    let key = queue.get().await.unwrap();
    queue.add("default/a".to_string());

    // A second worker must not receive the key while it is in flight
    let second = tokio::time::timeout(Duration::from_millis(50), queue.get()).await;
    assert!(second.is_err(), "key handed out twice while in flight");

    queue.done(&key);
    let again = tokio::time::timeout(Duration::from_secs(1), queue.get())
        .await
        .unwrap();
    assert_eq!(again.as_deref(), Some("default/a"));
}
