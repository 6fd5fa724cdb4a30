use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use sg_domain::config::PoolConfig;
use sg_domain::error::{Error, Result};
use sg_pool::{ConnectionPool, Operation, OperationExecutor};
use sg_sessions::SessionManager;

struct Sleeper;

#[async_trait]
impl OperationExecutor for Sleeper {
    async fn execute(
        &self,
        _method: &str,
        params: Value,
        _session_id: Option<&str>,
    ) -> Result<Value> {
        let ms = params["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept": ms }))
    }
}

fn config(max_connections: usize, max_queue_size: usize) -> PoolConfig {
    PoolConfig {
        max_connections,
        max_queue_size,
        request_timeout_ms: 60_000,
        worker_count: max_connections,
    }
}

#[tokio::test(start_paused = true)]
async fn two_run_one_queues_fourth_is_rejected() {
    let pool = Arc::new(ConnectionPool::new(&config(2, 1), Arc::new(Sleeper), None));

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let p = Arc::clone(&pool);
        waiters.push(tokio::spawn(async move {
            p.submit(Operation::new("slow", json!({ "ms": 500 }))).await
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let stats = pool.stats();
    assert_eq!(stats.active, 2);
    assert_eq!(stats.queued, 1);

    let err = pool
        .submit(Operation::new("slow", json!({ "ms": 500 })))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { active: 2, queued: 1 }));
    assert_eq!(pool.stats().total_rejected, 1);

    // Nothing accepted is dropped: all three finish.
    for w in waiters {
        assert_eq!(w.await.unwrap().unwrap(), json!({ "slept": 500 }));
    }
    let stats = pool.stats();
    assert_eq!(stats.total_completed, 3);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queued, 0);
}

#[tokio::test(start_paused = true)]
async fn zero_queue_rejects_as_soon_as_slots_are_full() {
    let pool = Arc::new(ConnectionPool::new(&config(1, 0), Arc::new(Sleeper), None));
    let p = Arc::clone(&pool);
    let first =
        tokio::spawn(async move { p.submit(Operation::new("slow", json!({ "ms": 100 }))).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let err = pool.submit(Operation::new("slow", json!({}))).await.unwrap_err();
    assert_eq!(err.kind(), "pool_exhausted");
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn queued_operation_times_out_while_waiting() {
    let cfg = PoolConfig {
        request_timeout_ms: 200,
        ..config(1, 1)
    };
    let pool = Arc::new(ConnectionPool::new(&cfg, Arc::new(Sleeper), None));

    let p = Arc::clone(&pool);
    let _running =
        tokio::spawn(async move { p.submit(Operation::new("slow", json!({ "ms": 150 }))).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    // Waits in the queue, then runs for too long: the deadline counts from submission.
    let err = pool
        .submit(Operation::new("slow", json!({ "ms": 150 })))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "request_timeout");
    assert_eq!(pool.stats().pending, 0);
}

#[tokio::test]
async fn dispatch_touches_the_session() {
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 10));
    let before = sessions.get_or_create_session("s1");
    let pool = ConnectionPool::new(&config(1, 1), Arc::new(Sleeper), Some(Arc::clone(&sessions)));

    tokio::time::sleep(Duration::from_millis(5)).await;
    pool.submit(Operation::new("fast", json!({})).for_session("s1"))
        .await
        .unwrap();

    let after = sessions.get_session("s1").unwrap();
    assert!(after.last_activity_at > before.last_activity_at);
    assert_eq!(after.request_count, 0);
}

#[tokio::test(start_paused = true)]
async fn evicted_session_loses_its_queue() {
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 10));
    let pool = Arc::new(ConnectionPool::new(
        &config(1, 4),
        Arc::new(Sleeper),
        Some(Arc::clone(&sessions)),
    ));
    sessions.subscribe(pool.clone());
    sessions.get_or_create_session("doomed");

    let p = Arc::clone(&pool);
    let _busy =
        tokio::spawn(async move { p.submit(Operation::new("slow", json!({ "ms": 300 }))).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let p = Arc::clone(&pool);
    let queued = tokio::spawn(async move {
        p.submit(Operation::new("slow", json!({})).for_session("doomed")).await
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    sessions.remove_session("doomed");
    let err = queued.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), "cancelled");
}
