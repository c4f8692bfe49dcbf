//! Fixed-size worker pool.
//!
//! `n` tokio tasks share one [`WorkQueue`]. Each takes an item, runs the
//! [`RecognitionPipeline`] to completion and only then takes the next, so at
//! most `n` tasks are in flight and page order within a task is preserved.
//! Retry sleeps happen inside the worker; size the pool with the worst-case
//! backoff in mind.

use crate::dispatch::WorkQueue;
use crate::pipeline::recognize::RecognitionPipeline;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` consumers on the current runtime.
    pub fn spawn(
        workers: usize,
        queue: Arc<dyn WorkQueue>,
        pipeline: Arc<RecognitionPipeline>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|worker| {
                let queue = queue.clone();
                let pipeline = pipeline.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_worker(worker, queue, pipeline, shutdown).await })
            })
            .collect::<Vec<_>>();
        info!("Started {} worker(s)", handles.len());
        Self { shutdown, handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop taking new items, let in-flight tasks finish, and join.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker panicked: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<dyn WorkQueue>,
    pipeline: Arc<RecognitionPipeline>,
    shutdown: CancellationToken,
) {
    debug!(worker, "Worker started");
    loop {
        let item = tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                debug!(worker, "Shutdown requested, stopping worker");
                break;
            }

            item = queue.next() => match item {
                Some(item) => item,
                None => {
                    debug!(worker, "Queue closed, stopping worker");
                    break;
                }
            },
        };

        match pipeline.run(&item).await {
            Ok(outcome) => debug!(worker, task_id = %item.task_id, ?outcome, "Delivery handled"),
            Err(e) => error!(worker, task_id = %item.task_id, "Delivery failed: {}", e),
        }
    }
}
