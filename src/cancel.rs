//! Cancellation Controller.
//!
//! Cancellation is cooperative. Each running task owns a
//! [`CancellationToken`]; the pipeline polls it between page units and never
//! interrupts a backend call that is already in flight.
//!
//! Tokens are created on demand by whichever side touches the task first, so
//! a cancel that lands between the worker's pickup CAS and its first
//! `token()` call is not lost.

use crate::error::{OcrflowError, StoreError};
use crate::store::{TaskStore, TransitionFields};
use crate::task::{TaskId, TaskStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a cancel request achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was still queued and is now `cancelled`.
    Cancelled,
    /// The task is running; it stops at the next page boundary.
    Requested,
    /// Nothing to cancel; carries the existing terminal status.
    AlreadyTerminal(TaskStatus),
}

/// Per-task cancellation flags plus the logic to request them.
#[derive(Clone)]
pub struct CancellationController {
    store: Arc<dyn TaskStore>,
    tokens: Arc<Mutex<HashMap<TaskId, CancellationToken>>>,
}

impl CancellationController {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The token for `id`, created if this is the first reference.
    pub fn token(&self, id: TaskId) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.entry(id).or_default().clone()
    }

    /// Drop the token once the task is terminal.
    pub fn release(&self, id: TaskId) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.remove(&id);
    }

    /// Whether a cancel is pending for `id`.
    pub fn is_requested(&self, id: TaskId) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.get(&id).is_some_and(|t| t.is_cancelled())
    }

    /// Ask for `id` to be cancelled.
    ///
    /// Queued tasks are cancelled on the spot; running tasks are flagged and
    /// finish cancelling at their next page boundary. Repeating the call is
    /// harmless. Returns [`OcrflowError::TaskNotFound`] for unknown ids.
    pub async fn request_cancel(&self, id: TaskId) -> Result<CancelOutcome, OcrflowError> {
        loop {
            let task = self.store.get(id).await?;
            match task.status {
                TaskStatus::Queued => {
                    match self
                        .store
                        .transition(
                            id,
                            TaskStatus::Queued,
                            TaskStatus::Cancelled,
                            TransitionFields::none(),
                        )
                        .await
                    {
                        Ok(_) => {
                            info!(task_id = %id, "Cancelled queued task");
                            self.release(id);
                            return Ok(CancelOutcome::Cancelled);
                        }
                        // A worker picked it up meanwhile; re-read and flag it.
                        Err(e) if e.is_conflict() => {
                            debug!(task_id = %id, "Cancel raced pickup: {}", e);
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                TaskStatus::Processing => {
                    self.token(id).cancel();
                    // The pipeline may have finished between the read and the flag.
                    let now = self.store.get(id).await.map_err(OcrflowError::from)?;
                    if now.status.is_terminal() {
                        self.release(id);
                        return Ok(CancelOutcome::AlreadyTerminal(now.status));
                    }
                    info!(task_id = %id, "Cancellation requested");
                    return Ok(CancelOutcome::Requested);
                }
                terminal => return Ok(CancelOutcome::AlreadyTerminal(terminal)),
            }
        }
    }
}

impl std::fmt::Debug for CancellationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self
            .tokens
            .lock()
            .map(|t| t.len())
            .unwrap_or_default();
        f.debug_struct("CancellationController")
            .field("store", &"<dyn TaskStore>")
            .field("tokens", &pending)
            .finish()
    }
}

/// Map a store error from a CAS the pipeline lost into "someone else won".
pub(crate) fn lost_race(e: &StoreError) -> bool {
    e.is_conflict() || matches!(e, StoreError::NotFound(_))
}
