//! In-process task store.

use super::{apply_page, apply_transition, TaskStore, TransitionFields};
use crate::error::StoreError;
use crate::task::{PageResult, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// `HashMap` behind a `RwLock`. The write lock is held for the whole
/// read-compare-write of a transition, which is what gives CAS semantics.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("task map lock poisoned".to_string())
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: Task) -> Result<TaskId, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let id = task.id;
        if tasks.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        tasks.insert(id, task);
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        tasks.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        next: TaskStatus,
        fields: TransitionFields,
    ) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_transition(task, expected, next, fields)?;
        Ok(task.clone())
    }

    async fn append_page_result(&self, id: TaskId, page: PageResult) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_page(task, page)
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(|_| poisoned())?;
        let mut all: Vec<Task> = tasks.values().cloned().collect();
        all.sort_by_key(|t| (t.created_at, t.id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::EngineKind;
    use std::sync::Arc;

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = MemoryTaskStore::new();
        let id = TaskId::new();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(x)) if x == id));
    }

    #[tokio::test]
    async fn create_twice_is_duplicate() {
        let store = MemoryTaskStore::new();
        let task = Task::new(EngineKind::LocalOcr, "a.png");
        store.create(task.clone()).await.unwrap();
        assert!(matches!(store.create(task).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn only_one_concurrent_pickup_wins() {
        let store = Arc::new(MemoryTaskStore::new());
        let id = store
            .create(Task::new(EngineKind::LocalMultimodal, "doc.pdf"))
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .transition(id, TaskStatus::Queued, TaskStatus::Processing, TransitionFields::none())
                    .await
                    .is_ok()
            })
        });
        let wins = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(wins, 1);
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn list_is_oldest_first() {
        let store = MemoryTaskStore::new();
        let a = store.create(Task::new(EngineKind::LocalOcr, "a")).await.unwrap();
        let b = store.create(Task::new(EngineKind::LocalOcr, "b")).await.unwrap();
        let ids: Vec<TaskId> = store.list().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b]);
    }
}
