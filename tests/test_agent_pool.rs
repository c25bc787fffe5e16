//! Agent pool behavior: fan-in dispatch, concurrency ceiling, draining

mod test_helpers;

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use taskgrid::testing::MockExecutor;
use taskgrid::{AgentStatus, CoreError, CoreEvent, EventLog, TaskStatus};
use tokio_test::{assert_err, assert_ok};
use test_helpers::{analyzer_pool, task};

#[tokio::test]
async fn test_dispatch_many_preserves_order_and_frees_slots() {
    let executor = MockExecutor::succeeding().with_delay(Duration::from_millis(10));
    let pool = analyzer_pool(2, &executor);

    let tasks = vec![task("first"), task("second"), task("third")];
    let ids: Vec<_> = tasks.iter().map(|t| t.id).collect();
    let results = pool.dispatch_many(tasks).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().map(|t| t.id).collect::<Vec<_>>(), ids);
    assert!(results.iter().all(|t| t.status() == TaskStatus::Completed));
    assert_eq!(results[1].result().unwrap()["command"], "second");
    assert_eq!(pool.available_count(), 2);
    assert_eq!(pool.active_count(), 0);
    assert!(executor.probe().peak() <= 2);
}

#[tokio::test]
async fn test_dispatch_emits_event_pair_per_task() {
    let sink = EventLog::new();
    let executor = MockExecutor::succeeding().fail_on("broken", "bad input");
    let pool = taskgrid::AgentPool::new("analyzer", 2, Arc::new(executor))
        .with_event_sink(Arc::new(sink.clone()));

    pool.dispatch_many(vec![task("ok"), task("broken")]).await;

    assert_eq!(sink.count("task_dispatched"), 2);
    assert_eq!(sink.count("task_completed"), 2);
    assert_eq!(sink.snapshot(), pool.events());

    for event in sink.snapshot() {
        match event {
            CoreEvent::TaskDispatched { agent_id, .. } => {
                assert!(agent_id.unwrap().starts_with("analyzer-"));
            }
            CoreEvent::TaskCompleted {
                success, result, ..
            } => assert_eq!(success, result.is_some()),
            other => panic!("unexpected event {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_dispatch_task_reraises_but_dispatch_many_records() {
    let executor = MockExecutor::failing("disk full");
    let pool = analyzer_pool(1, &executor);

    let submitted = task("write");
    let submitted_id = submitted.id;
    let err = assert_err!(pool.dispatch_task(submitted).await);
    assert!(matches!(err, CoreError::TaskFailed { ref message, .. } if message == "disk full"));

    let failed = err.into_task().unwrap();
    assert_eq!(failed.id, submitted_id);
    assert_eq!(failed.status(), TaskStatus::Failed);
    assert_eq!(failed.error(), Some("disk full"));
    assert!(failed.started_at().is_some());
    assert!(failed.completed_at().is_some());

    let results = pool.dispatch_many(vec![task("write")]).await;
    assert_eq!(results[0].status(), TaskStatus::Failed);
    assert_eq!(results[0].error(), Some("disk full"));

    let agent = &pool.agents()[0];
    assert_eq!(agent.status(), AgentStatus::Idle);
    assert_eq!(agent.tasks_failed(), 2);
    assert!(agent.current_task_id().is_none());
}

#[tokio::test]
async fn test_drain_then_dispatch_is_exhausted_until_reset() {
    let executor = MockExecutor::succeeding();
    let pool = analyzer_pool(2, &executor);

    let report = pool.drain(Duration::from_secs(1)).await;
    assert!(!report.timed_out);
    assert_eq!(report.still_active, 0);

    let err = pool.dispatch_task(task("late")).await.unwrap_err();
    assert!(err.is_pool_exhausted());

    let results = pool.dispatch_many(vec![task("late")]).await;
    assert_eq!(results[0].status(), TaskStatus::Failed);
    assert_eq!(executor.call_count().await, 0);

    pool.reset();
    let again = assert_ok!(pool.dispatch_task(task("again")).await);
    assert_eq!(again.status(), TaskStatus::Completed);
}

#[tokio::test]
async fn test_drain_with_zero_timeout_takes_agents_offline() {
    let executor = MockExecutor::succeeding().with_delay(Duration::from_millis(200));
    let pool = analyzer_pool(2, &executor);

    let running = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.dispatch_task(task("slow")).await })
    };
    while pool.active_count() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let report = pool.drain(Duration::ZERO).await;
    assert!(report.timed_out);
    assert_eq!(report.still_active, 1);
    assert!(pool
        .agents()
        .iter()
        .all(|agent| agent.status() == AgentStatus::Offline));

    let finished = running.await.unwrap().unwrap();
    assert_eq!(finished.status(), TaskStatus::Completed);

    let agents = pool.agents();
    assert!(agents.iter().all(|agent| agent.status() == AgentStatus::Offline));
    assert_eq!(agents.iter().map(|a| a.tasks_completed()).sum::<u64>(), 1);
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_work() {
    let executor = MockExecutor::succeeding().with_delay(Duration::from_millis(30));
    let pool = analyzer_pool(1, &executor);

    let running = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.dispatch_task(task("slow")).await })
    };
    while pool.active_count() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let report = pool.drain(Duration::from_secs(5)).await;
    assert!(!report.timed_out);
    assert_eq!(report.still_active, 0);
    assert_ok!(running.await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_settled_drain_never_overlaps_running_work() {
    for _ in 0..20 {
        let executor = MockExecutor::succeeding().with_delay(Duration::from_millis(3));
        let pool = analyzer_pool(2, &executor);

        let dispatches: Vec<_> = (0..6)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.dispatch_task(task(&format!("t{i}"))).await })
            })
            .collect();
        tokio::task::yield_now().await;

        let report = pool.drain(Duration::from_secs(5)).await;
        let drained_at = chrono::Utc::now();
        assert!(!report.timed_out);
        assert_eq!(report.still_active, 0);

        for dispatch in dispatches {
            match dispatch.await.unwrap() {
                Ok(done) => assert!(done.completed_at().unwrap() <= drained_at),
                Err(err) => assert!(err.is_pool_exhausted()),
            }
        }
        assert_eq!(pool.active_count(), 0);
    }
}

#[tokio::test]
async fn test_health_summary_reports_counters() {
    let executor = MockExecutor::succeeding().fail_on("bad", "nope");
    let pool = analyzer_pool(3, &executor);
    pool.dispatch_many(vec![task("good"), task("bad")]).await;

    let health = pool.health_summary();
    assert_eq!(health.pool_size, 3);
    assert_eq!(health.agent_type, "analyzer");
    assert_eq!(health.available_count, 3);
    assert!(!health.draining);
    let completed: u64 = health.agents.iter().map(|a| a.tasks_completed).sum();
    let failed: u64 = health.agents.iter().map(|a| a.tasks_failed).sum();
    assert_eq!((completed, failed), (1, 1));

    let json = serde_json::to_value(&health).unwrap();
    assert_eq!(json["agents"].as_array().unwrap().len(), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_running_tasks_never_exceed_pool_size(pool_size in 1usize..5, extra in 1usize..8) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        let peak = runtime.block_on(async {
            let executor = MockExecutor::succeeding().with_delay(Duration::from_millis(2));
            let pool = analyzer_pool(pool_size, &executor);
            let tasks = (0..pool_size + extra).map(|i| task(&format!("t{i}"))).collect();

            let results = pool.dispatch_many(tasks).await;
            assert!(results.iter().all(|t| t.status() == TaskStatus::Completed));
            assert_eq!(pool.available_count(), pool_size);
            executor.probe().peak()
        });

        prop_assert!(peak <= pool_size);
        prop_assert!(peak >= 1);
    }
}
