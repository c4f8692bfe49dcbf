//! Shared fixtures for the integration tests: a scripted recognizer, a
//! fixed-size splitter, recording/failing object stores and a fast retry
//! policy, so the full pipeline runs without tesseract, pdfium or network.

#![allow(dead_code)]

use async_trait::async_trait;
use ocrflow::{
    CancellationController, Dispatcher, EngineKind, EngineSet, InMemoryQueue, MemoryTaskStore,
    ObjectStore, PageUnit, RecognitionError, RecognitionPipeline, Recognizer, ResultPublisher,
    RetryPolicy, Splitter, StorageError, TaskId, TaskProgressCallback, TaskStatus, WorkItem,
    WorkQueue,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

// ── Retry ────────────────────────────────────────────────────────────────────

/// Valid policy with millisecond delays and no jitter.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        rate_limited_min_delay: Duration::from_millis(2),
        rate_limited_max_delay: Duration::from_millis(16),
        jitter: 0.0,
        ..RetryPolicy::default()
    }
}

// ── Recognizer ───────────────────────────────────────────────────────────────

/// Pauses a page's backend call until released.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Returns queued results per unit index; `"text N"` once a queue is empty.
#[derive(Default)]
pub struct ScriptedRecognizer {
    scripts: Mutex<HashMap<usize, VecDeque<Result<String, RecognitionError>>>>,
    gates: Mutex<HashMap<usize, Gate>>,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue results for page `index`, consumed one per call.
    pub fn script(&self, index: usize, results: Vec<Result<String, RecognitionError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .extend(results);
    }

    /// Make page `index` fail with `error` on every call.
    pub fn always_fail(&self, index: usize, error: RecognitionError, times: usize) {
        self.script(index, vec![Err(error); times]);
    }

    pub fn gate(&self, index: usize) -> Gate {
        self.gates.lock().unwrap().entry(index).or_default().clone()
    }

    /// Unit indices in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, index: usize) -> usize {
        self.calls().into_iter().filter(|i| *i == index).count()
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    fn kind(&self) -> EngineKind {
        EngineKind::LocalOcr
    }

    async fn recognize(&self, unit: &PageUnit) -> Result<String, RecognitionError> {
        self.calls.lock().unwrap().push(unit.index);
        let gate = self.gates.lock().unwrap().get(&unit.index).cloned();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&unit.index)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| Ok(format!("text {}", unit.index)))
    }
}

// ── Splitter ─────────────────────────────────────────────────────────────────

/// Ignores the source bytes and yields `pages` units.
pub struct FixedSplitter {
    pub pages: usize,
}

impl Splitter for FixedSplitter {
    fn split(&self, _source: &[u8]) -> Result<Vec<PageUnit>, RecognitionError> {
        Ok((0..self.pages)
            .map(|index| PageUnit {
                index,
                bytes: vec![index as u8],
                mime: "image/png",
            })
            .collect())
    }
}

pub struct RejectingSplitter;

impl Splitter for RejectingSplitter {
    fn split(&self, _source: &[u8]) -> Result<Vec<PageUnit>, RecognitionError> {
        Err(RecognitionError::unsupported_format("unrecognised format"))
    }
}

// ── Object stores ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingObjectStore {
    puts: Mutex<Vec<(String, String)>>,
}

impl RecordingObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }

    pub fn text_for(&self, key: &str) -> Option<String> {
        self.puts()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, text)| text)
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let text = String::from_utf8(bytes).unwrap();
        self.puts.lock().unwrap().push((key.to_string(), text));
        Ok(format!("memory://{key}"))
    }
}

pub struct FailingObjectStore;

#[async_trait]
impl ObjectStore for FailingObjectStore {
    async fn put(&self, key: &str, _bytes: Vec<u8>) -> Result<String, StorageError> {
        Err(StorageError {
            key: key.to_string(),
            detail: "bucket does not exist".to_string(),
        })
    }
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<String>>,
}

impl TaskProgressCallback for RecordingProgress {
    fn on_task_start(&self, _task: TaskId, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }

    fn on_page_start(&self, _task: TaskId, page_num: usize, _total: usize) {
        self.events.lock().unwrap().push(format!("page {page_num}"));
    }

    fn on_page_complete(&self, _task: TaskId, page_num: usize, _total: usize, _len: usize) {
        self.events.lock().unwrap().push(format!("ok {page_num}"));
    }

    fn on_page_error(&self, _task: TaskId, page_num: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("err {page_num}"));
    }

    fn on_task_complete(&self, _task: TaskId, status: TaskStatus, succeeded: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {status} {succeeded}"));
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// Store, queue, dispatcher and pipeline wired around a scripted recognizer.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<MemoryTaskStore>,
    pub queue: Arc<InMemoryQueue>,
    pub dispatcher: Dispatcher,
    pub cancels: CancellationController,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub objects: Arc<RecordingObjectStore>,
    pub pipeline: Arc<RecognitionPipeline>,
}

impl Harness {
    pub fn new(pages: usize) -> Self {
        Self::build(Arc::new(FixedSplitter { pages }), None, |p| p)
    }

    /// Build with a custom splitter, optional object store and pipeline tweaks.
    pub fn build(
        splitter: Arc<dyn Splitter>,
        objects: Option<Arc<dyn ObjectStore>>,
        tweak: impl FnOnce(RecognitionPipeline) -> RecognitionPipeline,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let dispatcher = Dispatcher::new(store.clone(), queue.clone());
        let cancels = CancellationController::new(store.clone());
        let recognizer = ScriptedRecognizer::new();
        let recording = RecordingObjectStore::new();
        let object_store: Arc<dyn ObjectStore> = objects.unwrap_or_else(|| recording.clone());

        let pipeline = RecognitionPipeline::new(
            store.clone(),
            EngineSet::uniform(recognizer.clone()),
            splitter,
            cancels.clone(),
            ResultPublisher::new(object_store, ".txt"),
        )
        .with_retry(fast_retry());

        Self {
            dir,
            store,
            queue,
            dispatcher,
            cancels,
            recognizer,
            objects: recording,
            pipeline: Arc::new(tweak(pipeline)),
        }
    }

    /// Write a source file, submit it and take its work item off the queue.
    pub async fn submit(&self) -> (TaskId, WorkItem) {
        let path = self.dir.path().join(format!("{}.png", uuid_suffix()));
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nfake").unwrap();
        let id = self
            .dispatcher
            .submit(EngineKind::LocalOcr, path.to_string_lossy())
            .await
            .unwrap();
        let item = self.queue.next().await.unwrap();
        assert_eq!(item.task_id, id);
        (id, item)
    }
}

fn uuid_suffix() -> String {
    TaskId::new().to_string()
}
