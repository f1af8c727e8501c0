//! End-to-end lifecycle tests for queues, pools, and groups.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskmill::{
    AdaptiveConfig, AdaptivePool, BatchGroup, ErrorHandler, PoolConfig, PoolError, QueueConfig,
    SpawnGroup, TaskError, TaskQueue, WorkFn, WorkRef, WorkerPool,
};

fn counting_work(hits: &Arc<AtomicUsize>) -> WorkRef {
    let hits = Arc::clone(hits);
    WorkFn::arc(move || {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn failing_work(message: &str) -> WorkRef {
    let message = message.to_string();
    WorkFn::arc(move || {
        let message = message.clone();
        async move { Err(TaskError::failed(message)) }
    })
}

fn fast_pool(max_workers: usize) -> WorkerPool {
    WorkerPool::new(
        PoolConfig::default()
            .with_max_workers(max_workers)
            .with_poll_interval(Duration::from_millis(1)),
    )
    .unwrap()
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 8))]
async fn pool_never_exceeds_max_concurrency() {
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    let pool = fast_pool(3);
    pool.start().unwrap();

    for _ in 0..10 {
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        pool.submit(WorkFn::arc(move || {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
    }

    pool.block().finish(Duration::from_millis(2)).await;
    pool.join().await.unwrap();

    assert_eq!(done.load(Ordering::SeqCst), 10);
    assert!(
        peak.load(Ordering::SeqCst) <= 3,
        "observed {} concurrent tasks on a pool of 3",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_dispatches_in_submission_order() {
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    // One worker: execution order is exactly dispatch-start order.
    let pool = fast_pool(1);
    pool.start().unwrap();

    for tag in 0..6 {
        let order = Arc::clone(&order);
        pool.submit(WorkFn::arc(move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().push(tag);
                Ok(())
            }
        }));
    }

    pool.block().finish(Duration::from_millis(2)).await;
    pool.join().await.unwrap();

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn ten_noop_tasks_run_exactly_once() {
    let hits = Arc::new(AtomicUsize::new(0));
    let pool = fast_pool(3);
    pool.start().unwrap();

    for _ in 0..10 {
        assert!(pool.submit(counting_work(&hits)));
    }
    pool.block().finish(Duration::from_millis(2)).await;
    tokio_test::assert_ok!(pool.join().await);

    assert_eq!(hits.load(Ordering::SeqCst), 10);
    assert_eq!(pool.metrics().completed, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handled_failure_never_raises() {
    let seen: Arc<Mutex<Vec<TaskError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: ErrorHandler = Arc::new(move |e| sink.lock().push(e.clone()));

    let pool = fast_pool(2);
    pool.start().unwrap();
    pool.submit_with(failing_work("boom"), handler);

    pool.finish(Duration::from_millis(2)).await;
    pool.join().await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], TaskError::Failed { ref error } if error == "boom"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unhandled_failure_surfaces_exactly_from_join() {
    let pool = fast_pool(2);
    pool.start().unwrap();
    pool.submit(failing_work("no survivors"));

    let err = pool.join().await.unwrap_err();
    assert!(
        matches!(err, PoolError::Task(TaskError::Failed { ref error }) if error == "no survivors")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn detached_pool_collects_every_failure() {
    let pool = fast_pool(2);
    pool.detach().start().unwrap();

    for i in 0..4 {
        pool.submit(failing_work(&format!("boom-{i}")));
    }
    pool.finish(Duration::from_millis(2)).await;
    pool.join().await.unwrap();

    assert_eq!(pool.failures().len(), 4);
    assert_eq!(pool.metrics().failed, 4);
    // Later failures may be reaped at join (after stop) rather than
    // replaced mid-flight, but the first wave always is.
    assert!(pool.metrics().workers_replaced >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_drains_backlog_through_fresh_units() {
    let hits = Arc::new(AtomicUsize::new(0));
    let queue = TaskQueue::new(
        QueueConfig::default()
            .with_max_workers(2)
            .with_poll_interval(Duration::from_millis(1)),
    )
    .unwrap();
    queue.start().unwrap();

    for _ in 0..8 {
        assert!(queue.submit(counting_work(&hits)));
    }
    queue.block().finish(Duration::from_millis(2)).await;
    tokio_test::assert_ok!(queue.join().await);

    assert_eq!(hits.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn blocked_queue_rejects_submissions() {
    let hits = Arc::new(AtomicUsize::new(0));
    let queue = TaskQueue::new(QueueConfig::default()).unwrap();

    queue.block();
    assert!(!queue.submit(counting_work(&hits)));
    queue.unblock();
    assert!(queue.submit(counting_work(&hits)));
}

#[tokio::test(start_paused = true)]
async fn adaptive_pool_backs_off_while_idle() {
    let pool = AdaptivePool::new(
        AdaptiveConfig::default()
            .with_max_workers(1)
            .with_base_poll_interval(Duration::from_millis(1))
            .with_scale(1000),
    )
    .unwrap();

    // Fastest cadence before anything runs.
    assert_eq!(pool.current_poll_interval(), Duration::from_micros(1));

    pool.start().unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    // A quarter second of idle cycles pushes the interval closer to the
    // 1ms base than to the 1µs floor, never past the base.
    let interval = pool.current_poll_interval();
    assert!(
        interval > Duration::from_micros(500),
        "poll interval {interval:?} did not back off"
    );
    assert!(interval <= Duration::from_millis(1));

    pool.stop();
    pool.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn adaptive_pool_still_runs_everything() {
    let hits = Arc::new(AtomicUsize::new(0));
    let pool = AdaptivePool::new(
        AdaptiveConfig::default()
            .with_max_workers(3)
            .with_base_poll_interval(Duration::from_millis(2))
            .with_scale(100),
    )
    .unwrap();
    pool.start().unwrap();

    for _ in 0..10 {
        assert!(pool.submit(counting_work(&hits)));
    }
    pool.block().finish(Duration::from_millis(2)).await;
    pool.join().await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn groups_run_their_batches() {
    let hits = Arc::new(AtomicUsize::new(0));

    let group = SpawnGroup::new(counting_work(&hits));
    group.set_max(4).unwrap();
    group.start().unwrap();
    group.join().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    let batch = BatchGroup::new(counting_work(&hits), 6);
    batch.set_max(2).unwrap();
    batch.start().unwrap();
    batch.join().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 10);
    assert_eq!(batch.completed(), 6);
}
