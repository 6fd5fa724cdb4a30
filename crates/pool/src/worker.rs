//! Worker tasks.  They share one job queue and talk to the pool only
//! through channels: jobs in, completions out.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sg_domain::error::{Error, Result};

use crate::connection::RequestId;
use crate::executor::OperationExecutor;

pub(crate) struct Job {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
    /// Fired when the caller stopped waiting (timeout, abandonment,
    /// session eviction).
    pub abandoned: CancellationToken,
}

pub(crate) struct Completion {
    pub id: RequestId,
    pub result: Result<Value>,
}

pub(crate) type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

pub(crate) fn spawn_workers(
    count: usize,
    jobs: JobQueue,
    executor: Arc<dyn OperationExecutor>,
    done: mpsc::UnboundedSender<Completion>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|index| {
            let jobs = Arc::clone(&jobs);
            let executor = Arc::clone(&executor);
            let done = done.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_worker(index, jobs, executor, done, shutdown).await;
            })
        })
        .collect()
}

async fn run_worker(
    index: usize,
    jobs: JobQueue,
    executor: Arc<dyn OperationExecutor>,
    done: mpsc::UnboundedSender<Completion>,
    shutdown: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else { break };

        if job.abandoned.is_cancelled() {
            tracing::debug!(worker = index, request_id = job.id, "skipping abandoned job");
            continue;
        }

        let id = job.id;
        let run = AssertUnwindSafe(executor.execute(
            &job.method,
            job.params,
            job.session_id.as_deref(),
        ))
        .catch_unwind();

        let result = tokio::select! {
            outcome = run => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(Error::WorkerExecution(msg))) => Err(Error::WorkerExecution(msg)),
                Ok(Err(e)) => Err(Error::WorkerExecution(e.to_string())),
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    tracing::error!(
                        worker = index,
                        request_id = id,
                        error = %msg,
                        "operation panicked"
                    );
                    Err(Error::WorkerExecution(msg))
                }
            },
            _ = job.abandoned.cancelled() => {
                tracing::debug!(worker = index, request_id = id, "caller gone, operation dropped");
                continue;
            }
        };

        if done.send(Completion { id, result }).is_err() {
            break;
        }
    }
    tracing::debug!(worker = index, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".into()
    }
}
