//! # ocrflow
//!
//! Asynchronous document text recognition: submit a PDF or image, get a task
//! id back immediately, and let a pool of workers extract the text page by
//! page with one of three interchangeable engines.
//!
//! ## Why this crate?
//!
//! Recognition backends fail in different ways. A hosted model throttles, a
//! local model server may not be running, a page may simply be unreadable.
//! This crate normalises every backend failure into one error taxonomy,
//! retries only what is worth retrying (with a longer backoff for provider
//! throttling), keeps going past a bad page, and drives each task through a
//! compare-and-swap state machine so duplicate queue deliveries and
//! concurrent cancellations can never double-process or resurrect a task.
//!
//! ## Pipeline Overview
//!
//! ```text
//! submit ──▶ store (queued) ──▶ queue ──▶ worker
//!                                           │
//!                                           ├─ 1. Claim     CAS queued → processing
//!                                           ├─ 2. Split     PDF pages / single image (pdfium, spawn_blocking)
//!                                           ├─ 3. Recognise per page, retry/backoff, cancel check between pages
//!                                           ├─ 4. Aggregate all / some / no pages succeeded
//!                                           └─ 5. Publish   text → object storage (OpenDAL) → result_ref
//! ```
//!
//! ## Engines
//!
//! | Kind | Backend | Default model |
//! |------|---------|---------------|
//! | `local-ocr` | `tesseract` binary | languages `chi_sim+eng` |
//! | `remote-multimodal` | OpenAI-compatible API (SiliconFlow by default) | `Pro/Qwen/Qwen2-VL-7B-Instruct` |
//! | `local-multimodal` | Ollama | `llama3.2-vision:11b` |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocrflow::{EngineKind, OcrService, ServiceConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().workers(2).build()?;
//!     let service = OcrService::builder(config).start().await?;
//!
//!     let id = service.submit(EngineKind::LocalMultimodal, "invoice.pdf").await?;
//!     let task = service.wait_terminal(id, Duration::from_millis(250)).await?;
//!     println!("{}", serde_json::to_string_pretty(&task.report())?);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrflow` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocrflow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod publish;
pub mod retry;
pub mod service;
pub mod store;
pub mod task;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::{CancelOutcome, CancellationController};
pub use config::{
    LocalMultimodalConfig, LocalOcrConfig, ObjectStoreBackend, ObjectStoreConfig, PageSeparator,
    RemoteMultimodalConfig, ServiceConfig, ServiceConfigBuilder,
};
pub use dispatch::{Dispatcher, InMemoryQueue, WorkItem, WorkQueue};
pub use engine::{Engine, EngineSet, ProbeReport, Recognizer};
pub use error::{ErrorKind, OcrflowError, RecognitionError, StorageError, StoreError};
pub use pipeline::recognize::{RecognitionPipeline, RunOutcome};
pub use pipeline::split::{DocumentSplitter, PageUnit, Splitter};
pub use progress::{NoopProgressCallback, ProgressCallback, TaskProgressCallback};
pub use publish::{ObjectStore, OpendalObjectStore, ResultPublisher};
pub use retry::RetryPolicy;
pub use service::{OcrService, OcrServiceBuilder};
pub use store::{FileTaskStore, MemoryTaskStore, TaskStore, TransitionFields};
pub use task::{EngineKind, PageResult, PageStatus, StatusReport, Task, TaskId, TaskStatus};
pub use worker::WorkerPool;
