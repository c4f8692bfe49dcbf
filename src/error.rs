//! Error types for the ocrflow library.
//!
//! Failures live at two scopes, and the types mirror that split:
//!
//! * [`RecognitionError`]: **Non-fatal**: one page failed (backend rejected
//!   the image, call timed out, provider throttled us). It carries an
//!   [`ErrorKind`] so the retry controller can decide what to do, and it is
//!   stored on the page's [`crate::task::PageResult`] once retries run out.
//!   The rest of the document keeps going.
//!
//! * [`OcrflowError`]: **Fatal** for the operation that returned it
//!   (submit, cancel, service start). Task-level outcomes never travel
//!   through this type; they are written to the task record instead.
//!
//! [`StoreError`] and [`StorageError`] are the narrower errors of the two
//! external collaborators (task record store, object store).

use crate::task::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ── Taxonomy ─────────────────────────────────────────────────────────────

/// Engine-independent classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected at the boundary before a task existed.
    Validation,
    /// The source cannot be decomposed into pages. Permanent.
    UnsupportedFormat,
    /// The backend rejected the content. Permanent.
    Processing,
    /// Backend unreachable or misconfigured. Retried.
    EngineUnavailable,
    /// Timeout, connection reset, 5xx. Retried.
    TransientNetwork,
    /// Provider throttling. Retried with a longer backoff.
    RateLimited,
    /// Publishing the result failed. Fatal for the task.
    Storage,
    /// Lost a state-machine race. Never surfaced to callers.
    Conflict,
}

impl ErrorKind {
    /// Whether the retry controller may try again after this kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::EngineUnavailable | ErrorKind::TransientNetwork | ErrorKind::RateLimited
        )
    }

    /// Permanent per-unit failures: retrying cannot change the outcome.
    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorKind::Processing | ErrorKind::UnsupportedFormat)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::Processing => "processing_error",
            ErrorKind::EngineUnavailable => "engine_unavailable",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Page-level errors ────────────────────────────────────────────────────

/// A classified, non-fatal error for a single page (or for the split step).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RecognitionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server-requested delay (HTTP `Retry-After`), when the engine saw one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl RecognitionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedFormat, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineUnavailable, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: message.into(),
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

// ── Collaborator errors ──────────────────────────────────────────────────

/// Errors from a [`crate::store::TaskStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {0} already exists")]
    Duplicate(TaskId),

    /// Compare-and-swap lost: the stored status is not what the caller saw.
    #[error("task {id} is {actual}, expected {expected}")]
    Conflict {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    /// The requested edge is not part of the task state machine.
    #[error("task {id}: illegal transition {from} → {to}")]
    IllegalTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Page indices must stay contiguous and unique.
    #[error("task {id}: page index {index} is not contiguous ({len} pages recorded)")]
    InvalidPage { id: TaskId, index: usize, len: usize },

    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True for the race-resolution outcomes that a worker silently drops.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::IllegalTransition { .. }
        )
    }
}

/// Publishing a result to object storage failed.
#[derive(Debug, Clone, Error)]
#[error("failed to store '{key}': {detail}")]
pub struct StorageError {
    pub key: String,
    pub detail: String,
}

// ── Fatal errors ─────────────────────────────────────────────────────────

/// All fatal errors returned by the ocrflow library.
#[derive(Debug, Error)]
pub enum OcrflowError {
    /// Status or cancel query for an id the store has never seen.
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The work queue was shut down; no new items can be published.
    #[error("Work queue is closed")]
    QueueClosed,

    /// An engine needed for a task has no usable configuration.
    #[error("Engine '{engine}' is not configured.\n{hint}")]
    EngineNotConfigured { engine: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for OcrflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => OcrflowError::TaskNotFound(id),
            other => OcrflowError::Store(other),
        }
    }
}
