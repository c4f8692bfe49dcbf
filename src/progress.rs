//! Progress-callback trait for per-task, per-page recognition events.
//!
//! Inject an [`Arc<dyn TaskProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as workers process each page. Several workers run concurrently,
//! so every event carries the [`TaskId`] it belongs to.
//!
//! # Example
//!
//! ```rust
//! use ocrflow::{ServiceConfig, TaskId, TaskProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     pages: AtomicUsize,
//! }
//!
//! impl TaskProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, task: TaskId, page_num: usize, total: usize, text_len: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{task}: page {page_num}/{total} ({text_len} bytes)");
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { pages: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::task::{TaskId, TaskStatus};
use std::sync::Arc;

/// Called by the recognition pipeline as it processes a task.
///
/// Implementations must be `Send + Sync`: events for different tasks arrive
/// from different workers at the same time. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait TaskProgressCallback: Send + Sync {
    /// Called once the document has been split.
    ///
    /// # Arguments
    /// * `total_pages`: number of units that will be recognised
    fn on_task_start(&self, task: TaskId, total_pages: usize) {
        let _ = (task, total_pages);
    }

    /// Called just before the first backend call for a page.
    ///
    /// # Arguments
    /// * `page_num`: 1-indexed page number
    fn on_page_start(&self, task: TaskId, page_num: usize, total_pages: usize) {
        let _ = (task, page_num, total_pages);
    }

    /// Called when a page is recognised.
    ///
    /// # Arguments
    /// * `text_len`: byte length of the cleaned text
    fn on_page_complete(&self, task: TaskId, page_num: usize, total_pages: usize, text_len: usize) {
        let _ = (task, page_num, total_pages, text_len);
    }

    /// Called when a page fails after the retry budget is spent.
    fn on_page_error(&self, task: TaskId, page_num: usize, total_pages: usize, error: &str) {
        let _ = (task, page_num, total_pages, error);
    }

    /// Called once the task reached a terminal status.
    fn on_task_complete(&self, task: TaskId, status: TaskStatus, succeeded_pages: usize) {
        let _ = (task, status, succeeded_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl TaskProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn TaskProgressCallback>;
