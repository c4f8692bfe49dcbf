//! `OcrService`: the wired-up system behind one handle.
//!
//! Builds the store, queue, engines, splitter, publisher and worker pool
//! from a [`ServiceConfig`], and exposes the caller-facing operations:
//! submit, status, cancel, wait and probe. Every collaborator can be
//! replaced through [`OcrServiceBuilder`], which is how the integration
//! tests run the whole flow against a scripted engine and in-memory storage.
//!
//! ```rust,no_run
//! use ocrflow::{EngineKind, OcrService, ServiceConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = OcrService::builder(ServiceConfig::from_env()?).start().await?;
//!     let id = service.submit(EngineKind::LocalOcr, "scan.pdf").await?;
//!     let task = service.wait_terminal(id, Duration::from_millis(200)).await?;
//!     println!("{}", serde_json::to_string(&task.report())?);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::cancel::{CancelOutcome, CancellationController};
use crate::config::ServiceConfig;
use crate::dispatch::{Dispatcher, InMemoryQueue, WorkQueue};
use crate::engine::{Engine, EngineSet, ProbeReport, Recognizer};
use crate::error::OcrflowError;
use crate::pipeline::recognize::RecognitionPipeline;
use crate::pipeline::split::{DocumentSplitter, Splitter};
use crate::publish::{ObjectStore, OpendalObjectStore, ResultPublisher};
use crate::store::{MemoryTaskStore, TaskStore};
use crate::task::{EngineKind, StatusReport, Task, TaskId};
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Collaborator overrides for [`OcrService`].
pub struct OcrServiceBuilder {
    config: ServiceConfig,
    store: Option<Arc<dyn TaskStore>>,
    queue: Option<Arc<dyn WorkQueue>>,
    engines: Option<EngineSet>,
    object_store: Option<Arc<dyn ObjectStore>>,
    splitter: Option<Arc<dyn Splitter>>,
}

impl OcrServiceBuilder {
    /// Task store; default [`MemoryTaskStore`].
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Work queue; default a fresh [`InMemoryQueue`].
    pub fn queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Recognizers; default the three configured engines.
    pub fn engines(mut self, engines: EngineSet) -> Self {
        self.engines = Some(engines);
        self
    }

    /// Result storage; default built from `config.object_store`.
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    /// Splitter; default [`DocumentSplitter`] with the configured pdfium settings.
    pub fn splitter(mut self, splitter: Arc<dyn Splitter>) -> Self {
        self.splitter = Some(splitter);
        self
    }

    /// Wire everything and spawn the worker pool on the current runtime.
    pub async fn start(self) -> Result<OcrService, OcrflowError> {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTaskStore::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryQueue::new()));

        // Built-in engines are kept concrete for fail-fast checks and probes.
        let (engines, builtin) = match self.engines {
            Some(engines) => (engines, Vec::new()),
            None => {
                let local_ocr = Arc::new(Engine::from_config(EngineKind::LocalOcr, &config)?);
                let remote = Arc::new(Engine::from_config(EngineKind::RemoteMultimodal, &config)?);
                let local = Arc::new(Engine::from_config(EngineKind::LocalMultimodal, &config)?);
                let set = EngineSet::new(local_ocr.clone(), remote.clone(), local.clone());
                (set, vec![local_ocr, remote, local])
            }
        };

        let object_store = match self.object_store {
            Some(store) => store,
            None => Arc::new(OpendalObjectStore::from_config(&config.object_store)?),
        };
        let splitter = self.splitter.unwrap_or_else(|| {
            Arc::new(DocumentSplitter::new(
                config.render_max_pixels,
                config.pdfium_library_path.clone(),
            ))
        });

        let cancels = CancellationController::new(store.clone());
        let publisher = ResultPublisher::new(object_store, config.object_store.suffix.clone());
        let mut pipeline = RecognitionPipeline::new(
            store.clone(),
            engines,
            splitter,
            cancels.clone(),
            publisher,
        )
        .with_retry(config.retry.clone())
        .with_separator(config.page_separator.clone())
        .with_remove_source_on_finish(config.remove_source_on_finish);
        if let Some(cb) = &config.progress_callback {
            pipeline = pipeline.with_progress(cb.clone());
        }

        for engine in &builtin {
            let report = engine.probe().await;
            if report.available {
                info!(engine = %report.kind, "Engine ready: {}", report.detail);
            } else {
                warn!(engine = %report.kind, "Engine not available: {}", report.detail);
            }
        }

        let pool = WorkerPool::spawn(config.workers, queue.clone(), Arc::new(pipeline));
        Ok(OcrService {
            store: store.clone(),
            dispatcher: Dispatcher::new(store, queue),
            cancels,
            builtin,
            pool,
        })
    }
}

/// A running recognition service.
pub struct OcrService {
    store: Arc<dyn TaskStore>,
    dispatcher: Dispatcher,
    cancels: CancellationController,
    builtin: Vec<Arc<Engine>>,
    pool: WorkerPool,
}

impl OcrService {
    pub fn builder(config: ServiceConfig) -> OcrServiceBuilder {
        OcrServiceBuilder {
            config,
            store: None,
            queue: None,
            engines: None,
            object_store: None,
            splitter: None,
        }
    }

    /// Queue `source_ref` for recognition with `engine_kind`.
    ///
    /// Rejects up front when the built-in engine for `engine_kind` cannot
    /// possibly work (e.g. remote engine without an API key).
    pub async fn submit(
        &self,
        engine_kind: EngineKind,
        source_ref: impl Into<String>,
    ) -> Result<TaskId, OcrflowError> {
        if let Some(engine) = self.builtin_engine(engine_kind) {
            engine.check_configured()?;
        }
        self.dispatcher.submit(engine_kind, source_ref).await
    }

    /// Caller-facing status; `TaskNotFound` for unknown ids.
    pub async fn status(&self, id: TaskId) -> Result<StatusReport, OcrflowError> {
        Ok(self.task(id).await?.report())
    }

    /// The full task record, including per-page results.
    pub async fn task(&self, id: TaskId) -> Result<Task, OcrflowError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, OcrflowError> {
        Ok(self.store.list().await?)
    }

    pub async fn request_cancel(&self, id: TaskId) -> Result<CancelOutcome, OcrflowError> {
        self.cancels.request_cancel(id).await
    }

    /// Poll until `id` is terminal.
    pub async fn wait_terminal(&self, id: TaskId, poll: Duration) -> Result<Task, OcrflowError> {
        loop {
            let task = self.task(id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Reachability of the built-in engines (empty when engines were injected).
    pub async fn probe(&self) -> Vec<ProbeReport> {
        let mut reports = Vec::with_capacity(self.builtin.len());
        for engine in &self.builtin {
            reports.push(engine.probe().await);
        }
        reports
    }

    pub fn workers(&self) -> usize {
        self.pool.size()
    }

    /// Stop the pool after in-flight tasks finish.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }

    fn builtin_engine(&self, kind: EngineKind) -> Option<&Engine> {
        self.builtin
            .iter()
            .map(|e| e.as_ref())
            .find(|e| e.kind() == kind)
    }
}

impl std::fmt::Debug for OcrService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrService")
            .field("pool", &self.pool)
            .field("cancels", &self.cancels)
            .finish_non_exhaustive()
    }
}
