//! End-to-end scenarios against a live Redis.
//!
//! Every test is `#[ignore]`d so the default suite stays hermetic; run them
//! with a local Redis via:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo test -p oraq -- --ignored
//! ```
//!
//! Each test uses a unique key-namespace prefix, so runs never collide and
//! leave only self-expiring keys behind on failure.

use oraq::{Queue, QueueConfig, SubmitOptions};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_prefix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("oraq-it-{}", nanos)
}

fn test_config(concurrency: usize, ping_ms: u64, timeout_ms: u64) -> QueueConfig {
    QueueConfig {
        id: "itest".to_string(),
        prefix: unique_prefix(),
        url: redis_url(),
        concurrency,
        ping_ms,
        timeout_ms,
        ..QueueConfig::default()
    }
}

async fn raw_conn(url: &str) -> redis::aio::MultiplexedConnection {
    redis::Client::open(url)
        .unwrap()
        .get_multiplexed_async_connection()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn serial_fifo_completes_in_submission_order() {
    let queue = Arc::new(Queue::new(test_config(1, 500, 60_000)).await.unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));
    let started = Instant::now();

    let mut handles = Vec::new();
    for i in 1..=4u32 {
        let queue = queue.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            queue
                .submit(
                    |_| async move {
                        sleep(Duration::from_millis(1000)).await;
                        order.lock().unwrap().push(i);
                    },
                    SubmitOptions::new(),
                )
                .await
                .unwrap();
        }));
        // Space the enqueues out so submission order is well defined.
        sleep(Duration::from_millis(50)).await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(4000),
        "serial execution must not overlap, took {:?}",
        elapsed
    );
    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);

    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn concurrency_two_runs_in_pairs() {
    let queue = Arc::new(Queue::new(test_config(2, 500, 60_000)).await.unwrap());
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            queue
                .submit(
                    |_| async move { sleep(Duration::from_millis(1000)).await },
                    SubmitOptions::new(),
                )
                .await
                .unwrap();
        }));
        sleep(Duration::from_millis(20)).await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(3000),
        "four 1s jobs at concurrency 2 should take ~2s, took {:?}",
        elapsed
    );

    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn two_handles_share_the_concurrency_limit() {
    let cfg = test_config(1, 500, 60_000);
    let worker_a = Arc::new(Queue::new(cfg.clone()).await.unwrap());
    let worker_b = Arc::new(Queue::new(cfg).await.unwrap());
    let started = Instant::now();

    let mut handles = Vec::new();
    for worker in [&worker_a, &worker_b] {
        for _ in 0..2 {
            let worker = worker.clone();
            handles.push(tokio::spawn(async move {
                worker
                    .submit(
                        |_| async move { sleep(Duration::from_millis(500)).await },
                        SubmitOptions::new(),
                    )
                    .await
                    .unwrap();
            }));
            sleep(Duration::from_millis(20)).await;
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(2000),
        "four 500ms jobs across two workers at concurrency 1 must serialize, took {:?}",
        elapsed
    );

    worker_a.shutdown();
    worker_b.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn stuck_job_without_lease_is_reclaimed() {
    let cfg = test_config(1, 500, 60_000);
    let namespace = format!("{}:{}", cfg.prefix, cfg.id);
    let mut conn = raw_conn(&cfg.url).await;

    // A dead worker's leftover: an id in processing with no lease key.
    let _: () = redis::AsyncCommands::lpush(
        &mut conn,
        format!("{}:processing", namespace),
        "deadbeef",
    )
    .await
    .unwrap();

    let queue = Queue::new(cfg).await.unwrap();
    let started = Instant::now();
    queue
        .submit(|_| async move {}, SubmitOptions::new())
        .await
        .unwrap();

    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "the sweep must evict the dead id and admit promptly"
    );

    let processing: Vec<String> = redis::AsyncCommands::lrange(
        &mut conn,
        format!("{}:processing", namespace),
        0,
        -1,
    )
    .await
    .unwrap();
    assert!(processing.is_empty(), "stuck id must be evicted");

    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn timeout_escape_admits_despite_zero_concurrency() {
    // concurrency = 0 means no slot is ever available; only the wait
    // timeout can admit.
    let queue = Queue::new(test_config(0, 200, 2000)).await.unwrap();
    let started = Instant::now();

    let ran = queue
        .submit(|_| async move { true }, SubmitOptions::new())
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(ran);
    assert!(
        elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2500),
        "submit must resolve shortly after the timeout, took {:?}",
        elapsed
    );

    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn remove_by_id_clears_pending_state() {
    let cfg = test_config(1, 500, 60_000);
    let namespace = format!("{}:{}", cfg.prefix, cfg.id);
    let queue = Arc::new(Queue::new(cfg.clone()).await.unwrap());

    // Occupy the only slot so the target job stays pending.
    let blocker = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .submit(
                    |_| async move { sleep(Duration::from_millis(3000)).await },
                    SubmitOptions::new(),
                )
                .await
                .unwrap();
        })
    };
    sleep(Duration::from_millis(300)).await;

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move {
            let _ = queue
                .submit(|_| async move {}, SubmitOptions::new().job_id("victim"))
                .await;
        })
    };
    sleep(Duration::from_millis(300)).await;

    queue.remove_by_id("victim").await.unwrap();
    // Idempotent: a second removal is a no-op.
    queue.remove_by_id("victim").await.unwrap();

    let mut conn = raw_conn(&queue.config().url).await;
    let pending: Vec<String> =
        redis::AsyncCommands::lrange(&mut conn, format!("{}:pending", namespace), 0, -1)
            .await
            .unwrap();
    assert!(!pending.contains(&"victim".to_string()));
    let lock_exists: bool = redis::AsyncCommands::exists(
        &mut conn,
        format!("{}:pending:victim:lock", namespace),
    )
    .await
    .unwrap();
    assert!(!lock_exists);

    waiter.abort();
    blocker.await.unwrap();
    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn submit_leaves_no_orphan_keys() {
    let cfg = test_config(1, 500, 60_000);
    let namespace = format!("{}:{}", cfg.prefix, cfg.id);
    let queue = Queue::new(cfg).await.unwrap();

    let out = queue
        .submit(
            |data| async move { data.unwrap()["n"].as_i64().unwrap() * 2 },
            SubmitOptions::new()
                .job_id("only")
                .job_data(serde_json::json!({"n": 21})),
        )
        .await
        .unwrap();
    assert_eq!(out, 42);

    assert_eq!(queue.pending_count().await.unwrap(), 0);
    assert_eq!(queue.processing_count().await.unwrap(), 0);

    let mut conn = raw_conn(&queue.config().url).await;
    for key in [
        format!("{}:pending:only:lock", namespace),
        format!("{}:processing:only:lock", namespace),
    ] {
        let exists: bool = redis::AsyncCommands::exists(&mut conn, key).await.unwrap();
        assert!(!exists, "no lease key may survive a completed submit");
    }

    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn lifo_admits_newest_first() {
    let queue = Arc::new(Queue::new(test_config(1, 500, 60_000)).await.unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    // Hold the slot while the LIFO batch queues up behind it.
    let blocker = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .submit(
                    |_| async move { sleep(Duration::from_millis(1500)).await },
                    SubmitOptions::new(),
                )
                .await
                .unwrap();
        })
    };
    sleep(Duration::from_millis(300)).await;

    let mut handles = Vec::new();
    for i in 1..=3u32 {
        let queue = queue.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            queue
                .submit(
                    |_| async move {
                        order.lock().unwrap().push(i);
                    },
                    SubmitOptions::new().lifo(true),
                )
                .await
                .unwrap();
        }));
        sleep(Duration::from_millis(100)).await;
    }

    blocker.await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        *order.lock().unwrap(),
        vec![3, 2, 1],
        "LIFO insertion admits the newest pending job first"
    );

    queue.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
#[ignore = "requires a running Redis"]
async fn submit_after_shutdown_is_rejected() {
    let queue = Queue::new(test_config(1, 500, 60_000)).await.unwrap();
    queue.shutdown();

    let result = queue
        .submit(|_| async move {}, SubmitOptions::new())
        .await;
    assert!(matches!(result, Err(oraq::QueueError::ShuttingDown)));
}
