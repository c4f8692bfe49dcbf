//! Task store backed by one JSON document per task.
//!
//! Writes go to `<id>.json.tmp` and are renamed over `<id>.json`, so a crash
//! mid-write never leaves a truncated record behind. A process-local mutex
//! serialises read-modify-write cycles; the store assumes a single process
//! owns the directory.

use super::{apply_page, apply_transition, TaskStore, TransitionFields};
use crate::error::StoreError;
use crate::task::{PageResult, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FileTaskStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", root.display())))?;
        debug!("File task store at {}", root.display());
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: TaskId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read(&self, id: TaskId) -> Result<Task, StoreError> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Unavailable(format!("{}: corrupt record: {e}", path.display())))
    }

    async fn write(&self, task: &Task) -> Result<(), StoreError> {
        let path = self.path_for(task.id);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(task)
            .map_err(|e| StoreError::Unavailable(format!("serialise task {}: {e}", task.id)))?;

        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(&self, task: Task) -> Result<TaskId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let id = task.id;
        match self.read(id).await {
            Ok(_) => return Err(StoreError::Duplicate(id)),
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.write(&task).await?;
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.read(id).await
    }

    async fn transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        next: TaskStatus,
        fields: TransitionFields,
    ) -> Result<Task, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self.read(id).await?;
        apply_transition(&mut task, expected, next, fields)?;
        self.write(&task).await?;
        Ok(task)
    }

    async fn append_page_result(&self, id: TaskId, page: PageResult) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut task = self.read(id).await?;
        apply_page(&mut task, page)?;
        self.write(&task).await
    }

    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.root.display())))?;

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<TaskId>().ok())
            else {
                warn!("Ignoring stray file in task store: {}", path.display());
                continue;
            };
            match self.read(id).await {
                Ok(task) => tasks.push(task),
                // Removed between read_dir and read
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::EngineKind;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileTaskStore::open(dir.path()).await.unwrap();
            let id = store
                .create(Task::new(EngineKind::RemoteMultimodal, "/uploads/x.pdf"))
                .await
                .unwrap();
            store
                .transition(id, TaskStatus::Queued, TaskStatus::Processing, TransitionFields::none())
                .await
                .unwrap();
            store
                .append_page_result(id, PageResult::succeeded(0, "hello".into(), 1))
                .await
                .unwrap();
            id
        };

        let reopened = FileTaskStore::open(dir.path()).await.unwrap();
        let task = reopened.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.pages.len(), 1);
        assert_eq!(task.pages[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn stale_cas_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let id = store.create(Task::new(EngineKind::LocalOcr, "a.png")).await.unwrap();
        store
            .transition(id, TaskStatus::Queued, TaskStatus::Cancelled, TransitionFields::none())
            .await
            .unwrap();

        let err = store
            .transition(id, TaskStatus::Queued, TaskStatus::Processing, TransitionFields::none())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        store.create(Task::new(EngineKind::LocalOcr, "a.png")).await.unwrap();
        tokio::fs::write(dir.path().join("notes.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("README"), b"hi").await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        assert!(matches!(store.get(TaskId::new()).await, Err(StoreError::NotFound(_))));
    }
}
