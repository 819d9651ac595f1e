//! Context pools
//!
//! A bounded set of persistent execution contexts dedicated to one project
//! configuration. Workers drain a shared queue of run requests; contexts
//! are reused across files within the config and never across configs.

use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::{ExecutionContext, ModuleLoader, RunRequest};
use crate::error::{RunnerError, TestError};
use crate::models::{ProjectConfig, TestFileReport};
use crate::snapshot::SnapshotBackend;

pub(crate) struct PoolJob {
    request: RunRequest,
    started: oneshot::Sender<()>,
    reply: oneshot::Sender<Result<TestFileReport, RunnerError>>,
}

/// Pool of execution contexts for one project configuration.
pub struct ContextPool {
    project: String,
    queue: Mutex<Option<mpsc::Sender<PoolJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl ContextPool {
    pub fn new(
        config: Arc<ProjectConfig>,
        size: usize,
        loader: Arc<dyn ModuleLoader>,
        snapshots: Arc<dyn SnapshotBackend>,
        shutdown_grace: Duration,
    ) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<PoolJob>(size);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for worker_id in 1..=size {
            let context = ExecutionContext::new(
                worker_id,
                config.clone(),
                loader.clone(),
                snapshots.clone(),
            );
            workers.push(tokio::spawn(worker_loop(context, rx.clone())));
        }
        debug!(project = %config.name, size, "context pool created");

        Self {
            project: config.name.clone(),
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shutdown_grace,
        }
    }

    /// Queue one file. The returned receiver resolves with the report or
    /// the propagated error; `started` fires when execution actually
    /// begins, not when the job is queued.
    pub async fn submit(
        &self,
        request: RunRequest,
        started: oneshot::Sender<()>,
    ) -> Result<oneshot::Receiver<Result<TestFileReport, RunnerError>>, RunnerError> {
        let queue = self
            .queue
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| {
                RunnerError::Pool(format!("pool for `{}` already destroyed", self.project))
            })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        queue
            .send(PoolJob {
                request,
                started,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RunnerError::Pool(format!("pool queue for `{}` is closed", self.project)))?;
        Ok(reply_rx)
    }

    /// Cooperative teardown: close the queue and let workers drain their
    /// in-flight work. Abort is the escalation once the grace period
    /// elapses.
    pub async fn destroy(&self) -> Result<(), RunnerError> {
        self.queue.lock().unwrap().take();

        let workers = mem::take(&mut *self.workers.lock().unwrap());
        for mut worker in workers {
            match tokio::time::timeout(self.shutdown_grace, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    return Err(RunnerError::Pool(format!(
                        "worker for `{}` failed to shut down: {join_error}",
                        self.project
                    )));
                }
                Err(_) => {
                    warn!(project = %self.project, "worker did not drain in time, aborting");
                    worker.abort();
                }
            }
        }

        debug!(project = %self.project, "context pool destroyed");
        Ok(())
    }
}

async fn worker_loop(context: ExecutionContext, queue: Arc<AsyncMutex<mpsc::Receiver<PoolJob>>>) {
    loop {
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else { break };

        let result = AssertUnwindSafe(context.run_file(job.request, job.started))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(RunnerError::ContextCrash(
                    TestError::from_panic(payload).to_string(),
                ))
            });
        let _ = job.reply.send(result);
    }
    context.teardown();
}
