//! Connection pool: bounded execution slots plus a FIFO overflow queue.
//!
//! `submit` either dispatches immediately (free slot), queues (free queue
//! space) or fails with `PoolExhausted`.  Every accepted operation gets a
//! deadline measured from submission; a caller that passes it receives
//! `RequestTimeout` and its slot is reclaimed while the worker, if it had
//! already started, is told to drop the work.
//!
//! All bookkeeping lives behind one `parking_lot::Mutex` that is never held
//! across an `.await`.  Workers are reached only through channels.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sg_domain::config::PoolConfig;
use sg_domain::error::{Error, Result};
use sg_domain::trace::TraceEvent;
use sg_sessions::{SessionEvent, SessionListener, SessionManager};

use crate::executor::{Operation, OperationExecutor};
use crate::worker::{self, Completion, Job};

/// Unique, never reused id of one submitted operation.
pub type RequestId = u64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An accepted operation waiting for a slot.
#[derive(Debug)]
struct QueuedOperation {
    id: RequestId,
    method: String,
    params: Value,
    session_id: Option<String>,
    enqueued_at: Instant,
    timeout_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queued,
    Running,
}

struct PendingRequest {
    tx: oneshot::Sender<Result<Value>>,
    method: String,
    session_id: Option<String>,
    stage: Stage,
    abandoned: CancellationToken,
}

struct PoolState {
    active: usize,
    queue: VecDeque<QueuedOperation>,
    pending: HashMap<RequestId, PendingRequest>,
    closed: bool,
}

struct Inner {
    max_connections: usize,
    max_queue_size: usize,
    request_timeout: Duration,
    state: Mutex<PoolState>,
    jobs: mpsc::UnboundedSender<Job>,
    sessions: Option<Arc<SessionManager>>,
    next_id: AtomicU64,
    total_submitted: AtomicU64,
    total_completed: AtomicU64,
    total_rejected: AtomicU64,
    total_timed_out: AtomicU64,
    shutdown: CancellationToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub max_connections: usize,
    pub queued: usize,
    pub max_queue_size: usize,
    pub pending: usize,
    /// `active / max_connections`, in `[0, 1]`.
    pub utilization: f64,
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_rejected: u64,
    pub total_timed_out: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConnectionPool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConnectionPool {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Build the pool and spawn its workers.  Must run inside a tokio
    /// runtime.
    pub fn new(
        config: &PoolConfig,
        executor: Arc<dyn OperationExecutor>,
        sessions: Option<Arc<SessionManager>>,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            max_connections: config.max_connections.max(1),
            max_queue_size: config.max_queue_size,
            request_timeout: config.request_timeout(),
            state: Mutex::new(PoolState {
                active: 0,
                queue: VecDeque::new(),
                pending: HashMap::new(),
                closed: false,
            }),
            jobs: job_tx,
            sessions,
            next_id: AtomicU64::new(1),
            total_submitted: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_timed_out: AtomicU64::new(0),
            shutdown: shutdown.clone(),
        });

        let mut tasks = worker::spawn_workers(
            config.worker_count.max(1),
            Arc::new(tokio::sync::Mutex::new(job_rx)),
            executor,
            done_tx,
            shutdown,
        );
        tasks.push(spawn_completion_loop(Arc::downgrade(&inner), done_rx));

        tracing::info!(
            max_connections = inner.max_connections,
            max_queue_size = inner.max_queue_size,
            workers = config.worker_count.max(1),
            timeout_ms = inner.request_timeout.as_millis() as u64,
            "connection pool started"
        );

        Self {
            inner,
            tasks: Mutex::new(tasks),
        }
    }

    /// Run `op`, waiting for a slot if necessary.
    pub async fn submit(&self, op: Operation) -> Result<Value> {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let enqueued_at = Instant::now();
        let timeout_at = enqueued_at + inner.request_timeout;
        let (tx, rx) = oneshot::channel();
        let abandoned = CancellationToken::new();

        let job = {
            let mut st = inner.state.lock();
            if st.closed {
                return Err(Error::Cancelled("connection pool is shut down".into()));
            }
            if st.active < inner.max_connections {
                st.active += 1;
                st.pending.insert(
                    id,
                    PendingRequest {
                        tx,
                        method: op.method.clone(),
                        session_id: op.session_id.clone(),
                        stage: Stage::Running,
                        abandoned: abandoned.clone(),
                    },
                );
                Some(Job {
                    id,
                    method: op.method,
                    params: op.params,
                    session_id: op.session_id,
                    abandoned,
                })
            } else if st.queue.len() < inner.max_queue_size {
                st.pending.insert(
                    id,
                    PendingRequest {
                        tx,
                        method: op.method.clone(),
                        session_id: op.session_id.clone(),
                        stage: Stage::Queued,
                        abandoned,
                    },
                );
                st.queue.push_back(QueuedOperation {
                    id,
                    method: op.method,
                    params: op.params,
                    session_id: op.session_id,
                    enqueued_at,
                    timeout_at,
                });
                tracing::debug!(request_id = id, queued = st.queue.len(), "operation queued");
                None
            } else {
                let (active, queued) = (st.active, st.queue.len());
                drop(st);
                inner.total_rejected.fetch_add(1, Ordering::Relaxed);
                TraceEvent::PoolRejected {
                    session_id: op.session_id,
                    method: op.method,
                    active,
                    queued,
                }
                .emit();
                return Err(Error::PoolExhausted { active, queued });
            }
        };
        inner.total_submitted.fetch_add(1, Ordering::Relaxed);

        if let Some(job) = job {
            inner.dispatch(vec![job]);
        }

        // Releases the entry if this future is dropped before an answer.
        let _guard = PendingGuard {
            inner: inner.as_ref(),
            id,
        };

        match tokio::time::timeout_at(timeout_at, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled(format!("request {id} was dropped"))),
            Err(_) => {
                let timeout_ms = inner.request_timeout.as_millis() as u64;
                inner.total_timed_out.fetch_add(1, Ordering::Relaxed);
                if let Some(p) = inner.release(id) {
                    TraceEvent::RequestTimedOut {
                        request_id: id,
                        session_id: p.session_id,
                        method: p.method,
                        timeout_ms,
                    }
                    .emit();
                }
                Err(Error::RequestTimeout {
                    request_id: id,
                    timeout_ms,
                })
            }
        }
    }

    /// Resolve a pending caller.  Unknown or already-settled ids are a no-op.
    pub fn complete_request(&self, id: RequestId, result: Result<Value>) -> bool {
        self.inner.complete(id, result)
    }

    /// Reject every queued operation of `session_id` with `Cancelled`.
    /// Running operations are left to finish.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let cancelled: Vec<PendingRequest> = {
            let mut st = self.inner.state.lock();
            let ids: Vec<RequestId> = st
                .queue
                .iter()
                .filter(|q| q.session_id.as_deref() == Some(session_id))
                .map(|q| q.id)
                .collect();
            st.queue
                .retain(|q| q.session_id.as_deref() != Some(session_id));
            ids.iter().filter_map(|id| st.pending.remove(id)).collect()
        };

        let count = cancelled.len();
        for p in cancelled {
            p.abandoned.cancel();
            let _ = p.tx.send(Err(Error::Cancelled(format!(
                "session {session_id} was evicted"
            ))));
        }
        if count > 0 {
            tracing::info!(
                session_id = %session_id,
                cancelled = count,
                "cancelled queued operations"
            );
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let st = inner.state.lock();
        PoolStats {
            active: st.active,
            max_connections: inner.max_connections,
            queued: st.queue.len(),
            max_queue_size: inner.max_queue_size,
            pending: st.pending.len(),
            utilization: st.active as f64 / inner.max_connections as f64,
            total_submitted: inner.total_submitted.load(Ordering::Relaxed),
            total_completed: inner.total_completed.load(Ordering::Relaxed),
            total_rejected: inner.total_rejected.load(Ordering::Relaxed),
            total_timed_out: inner.total_timed_out.load(Ordering::Relaxed),
        }
    }

    /// Oldest queued operation's age, if anything is waiting.
    pub fn oldest_queued_age(&self) -> Option<Duration> {
        let st = self.inner.state.lock();
        st.queue.front().map(|q| q.enqueued_at.elapsed())
    }

    /// Fail everything still pending with `Cancelled` and stop the workers.
    pub async fn shutdown(&self) {
        let drained: Vec<PendingRequest> = {
            let mut st = self.inner.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.queue.clear();
            st.active = 0;
            st.pending.drain().map(|(_, p)| p).collect()
        };
        for p in drained {
            p.abandoned.cancel();
            let _ = p.tx.send(Err(Error::Cancelled("connection pool shut down".into())));
        }

        self.inner.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            // The completion loop ends once every worker dropped its sender.
            let _ = task.await;
        }
        tracing::info!("connection pool stopped");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl SessionListener for ConnectionPool {
    fn on_session_event(&self, event: &SessionEvent) {
        if let SessionEvent::Evicted { session, .. } = event {
            self.cancel_session(&session.id);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inner bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Inner {
    /// Remove `id` from the pending map, freeing its slot or queue entry
    /// and promoting queued work.
    fn release(&self, id: RequestId) -> Option<PendingRequest> {
        let (removed, jobs) = {
            let mut st = self.state.lock();
            let removed = st.pending.remove(&id);
            match removed.as_ref().map(|p| p.stage) {
                Some(Stage::Running) => st.active = st.active.saturating_sub(1),
                Some(Stage::Queued) => st.queue.retain(|q| q.id != id),
                None => {}
            }
            let jobs = if removed.is_some() {
                self.promote(&mut st)
            } else {
                Vec::new()
            };
            (removed, jobs)
        };
        if let Some(p) = removed.as_ref() {
            p.abandoned.cancel();
        }
        self.dispatch(jobs);
        removed
    }

    fn complete(&self, id: RequestId, result: Result<Value>) -> bool {
        match self.release(id) {
            Some(p) => {
                self.total_completed.fetch_add(1, Ordering::Relaxed);
                let _ = p.tx.send(result);
                true
            }
            None => {
                tracing::debug!(request_id = id, "completion for unknown or settled request");
                false
            }
        }
    }

    /// Move queued operations into free slots, FIFO.  Entries already past
    /// their deadline are left for their caller's timeout to clean up.
    fn promote(&self, st: &mut PoolState) -> Vec<Job> {
        let mut jobs = Vec::new();
        let now = Instant::now();
        while st.active < self.max_connections {
            let Some(op) = st.queue.pop_front() else { break };
            let Some(pending) = st.pending.get_mut(&op.id) else {
                continue;
            };
            if op.timeout_at <= now {
                // Keep the pending entry so the caller sees RequestTimeout.
                pending.stage = Stage::Queued;
                continue;
            }
            pending.stage = Stage::Running;
            st.active += 1;
            jobs.push(Job {
                id: op.id,
                method: op.method,
                params: op.params,
                session_id: op.session_id,
                abandoned: pending.abandoned.clone(),
            });
        }
        jobs
    }

    /// Touch each job's session and hand it to the workers.
    fn dispatch(&self, jobs: Vec<Job>) {
        for job in jobs {
            if let (Some(sessions), Some(sid)) = (&self.sessions, job.session_id.as_deref()) {
                sessions.touch_session(sid);
            }
            let id = job.id;
            if self.jobs.send(job).is_err() {
                tracing::warn!(request_id = id, "worker queue closed");
                if let Some(p) = self.release(id) {
                    let _ = p
                        .tx
                        .send(Err(Error::WorkerExecution("no worker available".into())));
                }
            }
        }
    }
}

/// Drops the pending entry of a caller that stopped waiting.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

fn spawn_completion_loop(
    inner: Weak<Inner>,
    mut done: mpsc::UnboundedReceiver<Completion>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Completion { id, result }) = done.recv().await {
            let Some(inner) = inner.upgrade() else { break };
            inner.complete(id, result);
        }
        tracing::debug!("completion loop stopped");
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl OperationExecutor for Echo {
        async fn execute(
            &self,
            method: &str,
            params: Value,
            _session_id: Option<&str>,
        ) -> Result<Value> {
            match method {
                "fail" => Err(Error::Other("disk on fire".into())),
                "panic" => panic!("executor exploded"),
                "sleep" => {
                    let ms = params["ms"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(json!({ "slept": ms }))
                }
                _ => Ok(params),
            }
        }
    }

    fn pool(max_connections: usize, max_queue_size: usize, timeout_ms: u64) -> ConnectionPool {
        let cfg = PoolConfig {
            max_connections,
            max_queue_size,
            request_timeout_ms: timeout_ms,
            worker_count: max_connections,
        };
        ConnectionPool::new(&cfg, Arc::new(Echo), None)
    }

    #[tokio::test]
    async fn submit_returns_executor_result() {
        let pool = pool(2, 2, 1_000);
        let out = pool
            .submit(Operation::new("echo", json!({ "x": 1 })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "x": 1 }));
        let stats = pool.stats();
        assert_eq!(stats.total_submitted, 1);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn executor_error_is_worker_execution() {
        let pool = pool(1, 0, 1_000);
        let err = pool.submit(Operation::new("fail", json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::WorkerExecution(ref m) if m.contains("disk on fire")));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let pool = pool(1, 0, 1_000);
        let err = pool.submit(Operation::new("panic", json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::WorkerExecution(ref m) if m.contains("executor exploded")));

        // The worker survived.
        let ok = pool.submit(Operation::new("echo", json!(7))).await.unwrap();
        assert_eq!(ok, json!(7));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reclaims_slot_and_late_completion_is_noop() {
        let pool = pool(1, 0, 50);
        let err = pool
            .submit(Operation::new("sleep", json!({ "ms": 1_000 })))
            .await
            .unwrap_err();
        let Error::RequestTimeout { request_id, .. } = err else {
            panic!("expected timeout, got {err:?}");
        };

        let stats = pool.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total_timed_out, 1);

        assert!(!pool.complete_request(request_id, Ok(json!("late"))));
        assert_eq!(pool.stats().total_completed, 0);
    }

    #[tokio::test]
    async fn complete_unknown_id_is_noop() {
        let pool = pool(1, 0, 1_000);
        assert!(!pool.complete_request(9_999, Ok(Value::Null)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_releases_slot() {
        let pool = Arc::new(pool(1, 1, 10_000));
        let p = Arc::clone(&pool);
        let waiter = tokio::spawn(async move {
            p.submit(Operation::new("sleep", json!({ "ms": 5_000 }))).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.stats().active, 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_eviction_cancels_queued_work() {
        let pool = Arc::new(pool(1, 2, 10_000));

        let p = Arc::clone(&pool);
        let running = tokio::spawn(async move {
            p.submit(Operation::new("sleep", json!({ "ms": 100 })).for_session("a"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let p = Arc::clone(&pool);
        let queued = tokio::spawn(async move {
            p.submit(Operation::new("echo", json!(1)).for_session("a")).await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.stats().queued, 1);

        assert_eq!(pool.cancel_session("a"), 1);
        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));

        // The running operation is unaffected.
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let pool = pool(1, 1, 1_000);
        pool.shutdown().await;
        let err = pool.submit(Operation::new("echo", json!(1))).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
