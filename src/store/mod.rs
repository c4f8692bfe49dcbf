//! Task Record Store: durable keyed storage of task state.
//!
//! Every mutation that changes `status` goes through
//! [`TaskStore::transition`], a compare-and-swap on the stored status. That
//! single primitive is what makes at-least-once queue delivery safe: two
//! workers racing for the same task both try `queued → processing`, exactly
//! one wins, and the loser sees [`StoreError::Conflict`] and walks away.
//!
//! Two implementations ship with the crate:
//!
//! * [`MemoryTaskStore`]: `RwLock<HashMap>`; tests and single-shot runs.
//! * [`FileTaskStore`]  : one JSON document per task, atomic rename writes;
//!   survives restarts so `ocrflow status` can read finished runs.

mod file;
mod memory;

pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;

use crate::error::StoreError;
use crate::task::{PageResult, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;

/// Optional fields written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionFields {
    pub result_ref: Option<String>,
    pub error: Option<String>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn result_ref(mut self, r: impl Into<String>) -> Self {
        self.result_ref = Some(r.into());
        self
    }

    pub fn error(mut self, e: impl Into<String>) -> Self {
        self.error = Some(e.into());
        self
    }
}

/// Storage contract for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Fails with `Duplicate` if the id is taken.
    async fn create(&self, task: Task) -> Result<TaskId, StoreError>;

    /// Fetch a task by id; `NotFound` for unknown ids.
    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Compare-and-swap `status` from `expected` to `next`, writing `fields`
    /// in the same step. Returns the updated record.
    async fn transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        next: TaskStatus,
        fields: TransitionFields,
    ) -> Result<Task, StoreError>;

    /// Record a page outcome. Replaces the entry with the same index, or
    /// appends when `page.index == pages.len()`. Only legal while the task
    /// is `processing`.
    async fn append_page_result(&self, id: TaskId, page: PageResult) -> Result<(), StoreError>;

    /// All tasks, oldest first.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;
}

/// Apply a CAS transition to an in-hand record. Shared by both stores so
/// the state machine is enforced in exactly one place.
pub(crate) fn apply_transition(
    task: &mut Task,
    expected: TaskStatus,
    next: TaskStatus,
    fields: TransitionFields,
) -> Result<(), StoreError> {
    if task.status != expected {
        return Err(StoreError::Conflict {
            id: task.id,
            expected,
            actual: task.status,
        });
    }
    if !expected.can_transition_to(next) {
        return Err(StoreError::IllegalTransition {
            id: task.id,
            from: expected,
            to: next,
        });
    }

    task.status = next;
    if let Some(r) = fields.result_ref {
        task.result_ref = Some(r);
    }
    if let Some(e) = fields.error {
        task.error = Some(e);
    }
    task.updated_at = Utc::now();
    Ok(())
}

pub(crate) fn apply_page(task: &mut Task, page: PageResult) -> Result<(), StoreError> {
    if task.status != TaskStatus::Processing {
        return Err(StoreError::Conflict {
            id: task.id,
            expected: TaskStatus::Processing,
            actual: task.status,
        });
    }

    let len = task.pages.len();
    let (index, attempts) = (page.index, page.attempts);
    match index {
        i if i < len => task.pages[i] = page,
        i if i == len => task.pages.push(page),
        _ => return Err(StoreError::InvalidPage { id: task.id, index, len }),
    }
    task.attempt_count = attempts;
    task.updated_at = Utc::now();
    Ok(())
}
