//! Task data model: the unit of work and its outcome.
//!
//! A [`Task`] is created `queued` by the dispatcher and afterwards mutated
//! only by the worker that won the `queued → processing` compare-and-swap.
//! Its terminal status is derived from its [`PageResult`]s by the
//! aggregation step of the recognition pipeline.

use crate::error::RecognitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Identity ─────────────────────────────────────────────────────────────

/// Opaque, globally unique task identifier.
///
/// UUIDv7, so ids sort by creation time and file-store listings come out in
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which recognition backend a task runs on. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Local OCR binary (tesseract).
    LocalOcr,
    /// Hosted multimodal inference API.
    RemoteMultimodal,
    /// Locally hosted multimodal model server (Ollama).
    LocalMultimodal,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [
        EngineKind::LocalOcr,
        EngineKind::RemoteMultimodal,
        EngineKind::LocalMultimodal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::LocalOcr => "local-ocr",
            EngineKind::RemoteMultimodal => "remote-multimodal",
            EngineKind::LocalMultimodal => "local-multimodal",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown engine '{s}' (expected one of: local-ocr, remote-multimodal, local-multimodal)"
                )
            })
    }
}

/// Task lifecycle status.
///
/// ```text
/// queued ──▶ processing ──▶ completed
///   │            ├────────▶ failed
///   │            └────────▶ cancelled
///   ├──────────────────────▶ cancelled
///   └──────────────────────▶ failed      (dispatch could not enqueue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one page within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Not attempted yet (or never, if the task was cancelled first).
    Pending,
    Succeeded,
    Failed,
}

// ── Records ──────────────────────────────────────────────────────────────

/// Result for a single page/unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based position in the original document.
    pub index: usize,
    pub status: PageStatus,
    /// Extracted text; present only when `status == Succeeded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Number of backend calls made for this page.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RecognitionError>,
}

impl PageResult {
    pub fn pending(index: usize) -> Self {
        Self {
            index,
            status: PageStatus::Pending,
            text: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn succeeded(index: usize, text: String, attempts: u32) -> Self {
        Self {
            index,
            status: PageStatus::Succeeded,
            text: Some(text),
            attempts,
            last_error: None,
        }
    }

    pub fn failed(index: usize, error: RecognitionError, attempts: u32) -> Self {
        Self {
            index,
            status: PageStatus::Failed,
            text: None,
            attempts,
            last_error: Some(error),
        }
    }

    /// 1-based page number for human-facing messages.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }
}

/// One user-submitted document's end-to-end recognition job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub engine_kind: EngineKind,
    /// Where the worker reads the uploaded source from (a local path).
    pub source_ref: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Backend calls made for the most recently recorded page.
    pub attempt_count: u32,
    pub pages: Vec<PageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// A fresh `queued` task with a new id.
    pub fn new(engine_kind: EngineKind, source_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            engine_kind,
            source_ref: source_ref.into(),
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
            pages: Vec::new(),
            result_ref: None,
            error: None,
        }
    }

    pub fn succeeded_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages
            .iter()
            .filter(|p| p.status == PageStatus::Succeeded)
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &PageResult> {
        self.pages.iter().filter(|p| p.status == PageStatus::Failed)
    }

    /// Caller-facing view of this task.
    pub fn report(&self) -> StatusReport {
        match self.status {
            TaskStatus::Queued | TaskStatus::Processing => StatusReport::Processing,
            TaskStatus::Completed => StatusReport::Completed {
                result_ref: self.result_ref.clone().unwrap_or_default(),
                error: self.error.clone(),
            },
            TaskStatus::Failed => StatusReport::Failed {
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            TaskStatus::Cancelled => StatusReport::Cancelled,
        }
    }
}

/// Status representation consumed by the boundary layer.
///
/// Serialises as `{"status": "completed", "result_ref": "..."}` etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusReport {
    Processing,
    Completed {
        result_ref: String,
        /// Set on degraded success (some pages failed).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Failed {
        error: String,
    },
    Cancelled,
}
