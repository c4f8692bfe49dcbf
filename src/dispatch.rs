//! Dispatcher and work queue.
//!
//! [`Dispatcher::submit`] persists a `queued` task, publishes a
//! [`WorkItem`] and returns the id without waiting for any backend. The
//! queue contract is at-least-once: a consumer may see the same item twice,
//! and [`InMemoryQueue::redeliver`] exists to model exactly that. Duplicate
//! deliveries are made harmless by the pickup CAS in the pipeline, not by
//! the queue.

use crate::error::OcrflowError;
use crate::store::{TaskStore, TransitionFields};
use crate::task::{EngineKind, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a worker needs to start a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub engine_kind: EngineKind,
    pub source_ref: String,
}

/// At-least-once work queue.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn publish(&self, item: WorkItem) -> Result<(), OcrflowError>;

    /// Next item, or `None` once the queue is closed and drained.
    async fn next(&self) -> Option<WorkItem>;
}

/// Unbounded in-process queue shared by every worker of one pool.
///
/// The receiver lock is held by whichever consumer is parked in `next`, so
/// closing goes through a separate token rather than the receiver.
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    closed: CancellationToken,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Deliver `item` again, as a broker would after a lost acknowledgement.
    pub fn redeliver(&self, item: WorkItem) -> Result<(), OcrflowError> {
        if self.closed.is_cancelled() {
            return Err(OcrflowError::QueueClosed);
        }
        self.tx.send(item).map_err(|_| OcrflowError::QueueClosed)
    }

    /// Stop accepting items; `next` drains what is left, then yields `None`.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn publish(&self, item: WorkItem) -> Result<(), OcrflowError> {
        self.redeliver(item)
    }

    async fn next(&self) -> Option<WorkItem> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => item,
            () = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }
}

/// Caller-facing entry point for new tasks.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Create a `queued` task for `source_ref` and enqueue it.
    ///
    /// Returns as soon as the item is on the queue. Fails only when the
    /// store or the queue is unavailable; in the latter case the orphaned
    /// record is marked `failed` so it never sits in `queued` forever.
    pub async fn submit(
        &self,
        engine_kind: EngineKind,
        source_ref: impl Into<String>,
    ) -> Result<TaskId, OcrflowError> {
        let task = Task::new(engine_kind, source_ref);
        let item = WorkItem {
            task_id: task.id,
            engine_kind,
            source_ref: task.source_ref.clone(),
        };
        let id = self.store.create(task).await?;

        if let Err(e) = self.queue.publish(item).await {
            error!(task_id = %id, "Failed to enqueue task: {}", e);
            if let Err(mark) = self
                .store
                .transition(
                    id,
                    TaskStatus::Queued,
                    TaskStatus::Failed,
                    TransitionFields::none().error(format!("could not enqueue: {}", e)),
                )
                .await
            {
                warn!(task_id = %id, "Could not mark unqueued task as failed: {}", mark);
            }
            return Err(e);
        }

        info!(task_id = %id, engine = %engine_kind, "Task queued");
        Ok(id)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTaskStore;
    use std::time::Duration;

    struct ClosedQueue;

    /// Cancels the record before failing, so the fallback CAS loses.
    struct CancellingQueue(Arc<MemoryTaskStore>);

    #[async_trait]
    impl WorkQueue for CancellingQueue {
        async fn publish(&self, item: WorkItem) -> Result<(), OcrflowError> {
            self.0
                .transition(
                    item.task_id,
                    TaskStatus::Queued,
                    TaskStatus::Cancelled,
                    TransitionFields::none(),
                )
                .await?;
            Err(OcrflowError::QueueClosed)
        }

        async fn next(&self) -> Option<WorkItem> {
            None
        }
    }

    #[async_trait]
    impl WorkQueue for ClosedQueue {
        async fn publish(&self, _item: WorkItem) -> Result<(), OcrflowError> {
            Err(OcrflowError::QueueClosed)
        }

        async fn next(&self) -> Option<WorkItem> {
            None
        }
    }

    #[tokio::test]
    async fn submit_creates_queued_task_and_enqueues() {
        let store = Arc::new(MemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let d = Dispatcher::new(store.clone(), queue.clone());

        let id = d.submit(EngineKind::LocalOcr, "/tmp/a.png").await.unwrap();
        let task = store.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.engine_kind, EngineKind::LocalOcr);

        let item = queue.next().await.unwrap();
        assert_eq!(item.task_id, id);
        assert_eq!(item.source_ref, "/tmp/a.png");
    }

    #[tokio::test]
    async fn ids_are_unique_across_submits() {
        let d = Dispatcher::new(Arc::new(MemoryTaskStore::new()), Arc::new(InMemoryQueue::new()));
        let a = d.submit(EngineKind::LocalOcr, "a").await.unwrap();
        let b = d.submit(EngineKind::LocalOcr, "a").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn enqueue_failure_fails_the_record() {
        let store = Arc::new(MemoryTaskStore::new());
        let d = Dispatcher::new(store.clone(), Arc::new(ClosedQueue));
        let err = d.submit(EngineKind::RemoteMultimodal, "a.pdf").await.unwrap_err();
        assert!(matches!(err, OcrflowError::QueueClosed));

        let tasks = store.list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert!(tasks[0].error.as_deref().unwrap().contains("enqueue"));
    }

    #[tokio::test]
    async fn redelivery_yields_the_item_twice() {
        let queue = InMemoryQueue::new();
        let item = WorkItem {
            task_id: TaskId::new(),
            engine_kind: EngineKind::LocalMultimodal,
            source_ref: "x".into(),
        };
        queue.publish(item.clone()).await.unwrap();
        queue.redeliver(item.clone()).unwrap();
        assert_eq!(queue.next().await.unwrap(), item);
        assert_eq!(queue.next().await.unwrap(), item);
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let queue = InMemoryQueue::new();
        let item = WorkItem {
            task_id: TaskId::new(),
            engine_kind: EngineKind::LocalOcr,
            source_ref: "x".into(),
        };
        queue.publish(item.clone()).await.unwrap();
        queue.close();
        assert_eq!(queue.next().await, Some(item.clone()));
        assert_eq!(queue.next().await, None);
        assert!(matches!(queue.publish(item).await, Err(OcrflowError::QueueClosed)));
    }

    #[tokio::test]
    async fn close_wakes_an_idle_consumer() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.close();
        let next = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("consumer stayed parked after close")
            .unwrap();
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn failed_fallback_transition_still_returns_enqueue_error() {
        let store = Arc::new(MemoryTaskStore::new());
        let d = Dispatcher::new(store.clone(), Arc::new(CancellingQueue(store.clone())));
        let err = d.submit(EngineKind::LocalOcr, "a.png").await.unwrap_err();
        assert!(matches!(err, OcrflowError::QueueClosed));

        let tasks = store.list().await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Cancelled);
        assert!(tasks[0].error.is_none());
    }
}
