/// Task queue tests
///
/// Coalescing, concurrency ceiling, ordering, retries and draining.
/// Run with: cargo test --test task_queue_tests

use sheetsync::{EnqueueOptions, QueueStats, Result, SyncError, TaskQueue, TaskQueueConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};

fn queue(concurrency: usize) -> TaskQueue {
    TaskQueue::new(TaskQueueConfig::default().concurrency_per_key(concurrency))
}

async fn wait_for(gate: Arc<Semaphore>) -> Result<()> {
    gate.acquire()
        .await
        .map(|permit| permit.forget())
        .map_err(|err| SyncError::Internal(err.to_string()))
}

/// Occupies one slot of `key` until a permit is added to the returned gate.
fn block_key(
    queue: &TaskQueue,
    key: &str,
) -> (Arc<Semaphore>, impl std::future::Future<Output = Result<()>>) {
    let gate = Arc::new(Semaphore::new(0));
    let held = gate.clone();
    let done = queue.enqueue(key, move || wait_for(held.clone()), EnqueueOptions::new());
    (gate, done)
}

fn record(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Result<&'static str> {
    log.lock().unwrap().push(label);
    Ok(label)
}

#[tokio::test]
async fn test_coalesced_tasks_run_latest_work_once() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "c1");

    let runs_a = Arc::new(AtomicUsize::new(0));
    let runs_b = Arc::new(AtomicUsize::new(0));

    let counter = runs_a.clone();
    let first = queue.enqueue(
        "c1",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("from a") }
        },
        EnqueueOptions::new().coalesce_key("k"),
    );
    let counter = runs_b.clone();
    let second = queue.enqueue(
        "c1",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok("from b") }
        },
        EnqueueOptions::new().coalesce_key("k"),
    );

    assert_eq!(queue.stats("c1"), QueueStats { pending: 1, active: 1 });

    gate.add_permits(1);
    let (blocked, first, second) = tokio::join!(blocker, first, second);
    blocked.unwrap();

    assert_eq!(first.unwrap(), "from b");
    assert_eq!(second.unwrap(), "from b");
    assert_eq!(runs_a.load(Ordering::SeqCst), 0);
    assert_eq!(runs_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_coalesced_waiters_share_rejection() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "c1");

    let options = EnqueueOptions::new().coalesce_key("save").max_retries(0);
    let first = queue.enqueue("c1", || async { Ok(1) }, options.clone());
    let second = queue.enqueue(
        "c1",
        || async { Err::<i32, _>(SyncError::Validation("missing name".into())) },
        options,
    );

    gate.add_permits(1);
    let (_, first, second) = tokio::join!(blocker, first, second);

    let expected = SyncError::Validation("missing name".into());
    assert_eq!(first.unwrap_err(), expected);
    assert_eq!(second.unwrap_err(), expected);
}

#[tokio::test]
async fn test_running_task_is_not_coalesced() {
    let queue = queue(2);
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let runs = runs.clone();
        handles.push(queue.enqueue(
            "c1",
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            EnqueueOptions::new().coalesce_key("k"),
        ));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling_per_key() {
    let queue = queue(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let running = running.clone();
        let peak = peak.clone();
        let completed = completed.clone();
        handles.push(queue.enqueue(
            "c1",
            move || {
                let running = running.clone();
                let peak = peak.clone();
                let completed = completed.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            EnqueueOptions::new(),
        ));
    }

    assert_eq!(queue.stats("c1"), QueueStats { pending: 3, active: 2 });
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(completed.load(Ordering::SeqCst), 5);
    assert!(queue.stats("c1").is_idle());
}

#[tokio::test]
async fn test_priority_order_is_stable() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "c1");
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for (label, priority) in [("p10-first", 10), ("p5", 5), ("p10-second", 10), ("p1", 1)] {
        let log = log.clone();
        handles.push(queue.enqueue(
            "c1",
            move || {
                let outcome = record(&log, label);
                async move { outcome }
            },
            EnqueueOptions::new().priority(priority),
        ));
    }

    gate.add_permits(1);
    blocker.await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        *log.lock().unwrap(),
        vec!["p1", "p5", "p10-first", "p10-second"]
    );
}

#[tokio::test]
async fn test_coalescing_raises_priority() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "c1");
    let log = Arc::new(Mutex::new(Vec::new()));

    let enqueue = |label: &'static str, options: EnqueueOptions| {
        let log = log.clone();
        queue.enqueue(
            "c1",
            move || {
                let outcome = record(&log, label);
                async move { outcome }
            },
            options,
        )
    };

    let other = enqueue("other", EnqueueOptions::new().priority(5));
    let low = enqueue("save-low", EnqueueOptions::new().priority(10).coalesce_key("save"));
    let urgent = enqueue("save-urgent", EnqueueOptions::new().priority(1).coalesce_key("save"));

    gate.add_permits(1);
    let (_, other, low, urgent) = tokio::join!(blocker, other, low, urgent);

    assert_eq!(other.unwrap(), "other");
    assert_eq!(low.unwrap(), "save-urgent");
    assert_eq!(urgent.unwrap(), "save-urgent");
    assert_eq!(*log.lock().unwrap(), vec!["save-urgent", "other"]);
}

#[tokio::test]
async fn test_coalescing_keeps_arrival_order() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "c1");
    let log = Arc::new(Mutex::new(Vec::new()));

    let enqueue = |label: &'static str, options: EnqueueOptions| {
        let log = log.clone();
        queue.enqueue(
            "c1",
            move || {
                let outcome = record(&log, label);
                async move { outcome }
            },
            options,
        )
    };

    let first_save = enqueue("save-1", EnqueueOptions::new().coalesce_key("save"));
    let other = enqueue("other", EnqueueOptions::new());
    let second_save = enqueue("save-2", EnqueueOptions::new().coalesce_key("save"));
    assert_eq!(queue.stats("c1"), QueueStats { pending: 2, active: 1 });

    gate.add_permits(1);
    let (_, first_save, other, second_save) =
        tokio::join!(blocker, first_save, other, second_save);

    assert_eq!(first_save.unwrap(), "save-2");
    assert_eq!(second_save.unwrap(), "save-2");
    assert_eq!(other.unwrap(), "other");
    assert_eq!(*log.lock().unwrap(), vec!["save-2", "other"]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_success() {
    let queue = TaskQueue::new(TaskQueueConfig::default());
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let seen = attempts.clone();
    let result = queue
        .enqueue(
            "c1",
            move || {
                let mut seen = seen.lock().unwrap();
                seen.push(Instant::now());
                let attempt = seen.len();
                async move {
                    if attempt <= 2 {
                        Err(SyncError::StoreUnavailable(format!("attempt {}", attempt)))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            EnqueueOptions::new().max_retries(3).initial_backoff_ms(100),
        )
        .await;

    assert_eq!(result.unwrap(), 3);

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap >= Duration::from_millis(100) && first_gap <= Duration::from_millis(200));
    assert!(second_gap >= Duration::from_millis(200) && second_gap <= Duration::from_millis(400));
    assert!(second_gap >= first_gap);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_last_error() {
    let queue = TaskQueue::new(TaskQueueConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = queue
        .enqueue(
            "c1",
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Err::<(), _>(SyncError::StoreUnavailable(format!("attempt {}", attempt)))
                }
            },
            EnqueueOptions::new().max_retries(2).initial_backoff_ms(10),
        )
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        result.unwrap_err(),
        SyncError::StoreUnavailable("attempt 3".into())
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_fails_immediately() {
    let queue = TaskQueue::new(TaskQueueConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = queue
        .enqueue(
            "c1",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::Validation("inventory[0].name is required".into())) }
            },
            EnqueueOptions::new().should_retry(|err| err.is_transient()),
        )
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(SyncError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_predicate_stops_retries() {
    let queue = TaskQueue::new(TaskQueueConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = attempts.clone();
    let result = queue
        .enqueue(
            "c1",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::StoreUnavailable("offline".into())) }
            },
            EnqueueOptions::new().should_retry(|_| panic!("predicate bug")),
        )
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        result.unwrap_err(),
        SyncError::StoreUnavailable("offline".into())
    );
}

async fn explode() -> Result<u32> {
    panic!("work exploded")
}

#[tokio::test]
async fn test_panicking_work_frees_its_slot() {
    let queue = queue(1);

    let result = queue.enqueue("c1", explode, EnqueueOptions::new()).await;
    assert!(matches!(result, Err(SyncError::TaskPanicked(msg)) if msg == "work exploded"));

    let next = queue
        .enqueue("c1", || async { Ok(7) }, EnqueueOptions::new())
        .await;
    assert_eq!(next.unwrap(), 7);
    assert!(queue.stats("c1").is_idle());
}

#[tokio::test]
async fn test_keys_are_independent() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "a");

    let other = queue
        .enqueue("b", || async { Ok("b done") }, EnqueueOptions::new())
        .await;
    assert_eq!(other.unwrap(), "b done");
    assert_eq!(queue.stats("a").active, 1);

    gate.add_permits(1);
    blocker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flush_times_out_without_cancelling() {
    let queue = queue(2);
    let finished = Arc::new(AtomicUsize::new(0));

    let done = finished.clone();
    let handle = queue.enqueue(
        "c1",
        move || {
            let done = done.clone();
            async move {
                sleep(Duration::from_secs(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
        EnqueueOptions::new(),
    );

    assert!(!queue.flush("c1", Duration::from_millis(100)).await);
    assert_eq!(queue.stats("c1").active, 1);

    assert!(queue.flush("c1", Duration::from_secs(5)).await);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flush_all_drains_every_key() {
    let queue = queue(1);
    let mut handles = Vec::new();
    for key in ["a", "b", "c"] {
        handles.push(queue.enqueue(
            key,
            || async {
                sleep(Duration::from_millis(30)).await;
                Ok(())
            },
            EnqueueOptions::new(),
        ));
    }

    assert_eq!(queue.keys(), vec!["a", "b", "c"]);
    assert!(queue.flush_all(Duration::from_secs(1)).await);
    assert!(queue.keys().is_empty());
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_flush_unknown_key_is_immediate() {
    let queue = queue(2);
    assert!(queue.flush("nothing", Duration::ZERO).await);
    assert!(queue.flush_all(Duration::ZERO).await);
}

#[tokio::test]
async fn test_mismatched_coalesced_output_type() {
    let queue = queue(1);
    let (gate, blocker) = block_key(&queue, "c1");

    let as_number = queue.enqueue("c1", || async { Ok(1_u32) }, EnqueueOptions::new().coalesce_key("k"));
    let as_text = queue.enqueue(
        "c1",
        || async { Ok("text".to_string()) },
        EnqueueOptions::new().coalesce_key("k"),
    );

    gate.add_permits(1);
    let (_, as_number, as_text) = tokio::join!(blocker, as_number, as_text);
    assert!(matches!(as_number, Err(SyncError::Internal(_))));
    assert_eq!(as_text.unwrap(), "text");
}

#[tokio::test]
async fn test_global_queue_runs_work() {
    let value = TaskQueue::global()
        .enqueue("global-test", || async { Ok(5) }, EnqueueOptions::new())
        .await
        .unwrap();
    assert_eq!(value, 5);
}
