//! Engine Adapter: one `recognize(unit) -> text` contract over three backends.
//!
//! The set of backends is closed, so it is modelled as the [`Engine`] enum
//! and dispatch on [`EngineKind`] is a plain `match`. The [`Recognizer`]
//! trait exists only at the seam where the pipeline consumes an engine, so
//! tests can substitute a scripted one.
//!
//! Every variant normalises failures into the shared [`ErrorKind`]
//! taxonomy and never retries on its own; retrying is the
//! [`crate::retry::RetryPolicy`]'s job.
//!
//! | Kind | Backend | Throttling | Connection refused |
//! |------|---------|------------|--------------------|
//! | `local-ocr` | tesseract subprocess | n/a | n/a (spawn failure → `EngineUnavailable`) |
//! | `remote-multimodal` | OpenAI-compatible `/chat/completions` | `RateLimited` | `TransientNetwork` |
//! | `local-multimodal` | Ollama `/api/generate` | `EngineUnavailable` | `EngineUnavailable` |

mod local;
mod local_ocr;
mod remote;

pub use local::LocalMultimodalEngine;
pub use local_ocr::LocalOcrEngine;
pub use remote::RemoteMultimodalEngine;

use crate::config::ServiceConfig;
use crate::error::{ErrorKind, OcrflowError, RecognitionError};
use crate::pipeline::split::PageUnit;
use crate::task::EngineKind;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// The capability the pipeline needs from a backend.
#[async_trait]
pub trait Recognizer: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Extract text from one unit. Exactly one backend call; no retries.
    async fn recognize(&self, unit: &PageUnit) -> Result<String, RecognitionError>;
}

/// Result of a reachability check against a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub kind: EngineKind,
    pub available: bool,
    pub detail: String,
}

/// The three concrete backends.
#[derive(Debug)]
pub enum Engine {
    LocalOcr(LocalOcrEngine),
    RemoteMultimodal(RemoteMultimodalEngine),
    LocalMultimodal(LocalMultimodalEngine),
}

impl Engine {
    /// Build the engine for `kind` from the service configuration.
    pub fn from_config(kind: EngineKind, config: &ServiceConfig) -> Result<Self, OcrflowError> {
        Ok(match kind {
            EngineKind::LocalOcr => Engine::LocalOcr(LocalOcrEngine::new(config.local_ocr.clone())),
            EngineKind::RemoteMultimodal => {
                Engine::RemoteMultimodal(RemoteMultimodalEngine::new(config.remote.clone())?)
            }
            EngineKind::LocalMultimodal => {
                Engine::LocalMultimodal(LocalMultimodalEngine::new(config.local.clone())?)
            }
        })
    }

    /// Fail fast when a backend obviously cannot work (e.g. no API key).
    ///
    /// Submitting anyway is allowed; such tasks would fail with
    /// `engine_unavailable` after the retry budget is spent.
    pub fn check_configured(&self) -> Result<(), OcrflowError> {
        match self {
            Engine::RemoteMultimodal(e) if !e.has_api_key() => {
                Err(OcrflowError::EngineNotConfigured {
                    engine: EngineKind::RemoteMultimodal.to_string(),
                    hint: "Set OCRFLOW_REMOTE_API_KEY (or SILICON_FLOW_API_KEY).".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    pub async fn probe(&self) -> ProbeReport {
        match self {
            Engine::LocalOcr(e) => e.probe().await,
            Engine::RemoteMultimodal(e) => e.probe(),
            Engine::LocalMultimodal(e) => e.probe().await,
        }
    }
}

#[async_trait]
impl Recognizer for Engine {
    fn kind(&self) -> EngineKind {
        match self {
            Engine::LocalOcr(_) => EngineKind::LocalOcr,
            Engine::RemoteMultimodal(_) => EngineKind::RemoteMultimodal,
            Engine::LocalMultimodal(_) => EngineKind::LocalMultimodal,
        }
    }

    async fn recognize(&self, unit: &PageUnit) -> Result<String, RecognitionError> {
        match self {
            Engine::LocalOcr(e) => e.recognize(unit).await,
            Engine::RemoteMultimodal(e) => e.recognize(unit).await,
            Engine::LocalMultimodal(e) => e.recognize(unit).await,
        }
    }
}

/// One recognizer per [`EngineKind`], selected per task.
#[derive(Clone)]
pub struct EngineSet {
    local_ocr: Arc<dyn Recognizer>,
    remote: Arc<dyn Recognizer>,
    local: Arc<dyn Recognizer>,
}

impl EngineSet {
    pub fn new(
        local_ocr: Arc<dyn Recognizer>,
        remote: Arc<dyn Recognizer>,
        local: Arc<dyn Recognizer>,
    ) -> Self {
        Self {
            local_ocr,
            remote,
            local,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, OcrflowError> {
        let build = |kind| -> Result<Arc<dyn Recognizer>, OcrflowError> {
            Ok(Arc::new(Engine::from_config(kind, config)?))
        };
        Ok(Self::new(
            build(EngineKind::LocalOcr)?,
            build(EngineKind::RemoteMultimodal)?,
            build(EngineKind::LocalMultimodal)?,
        ))
    }

    /// The same recognizer for every kind.
    pub fn uniform(recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            local_ocr: recognizer.clone(),
            remote: recognizer.clone(),
            local: recognizer,
        }
    }

    /// Replace the recognizer used for `kind`.
    pub fn with(mut self, kind: EngineKind, recognizer: Arc<dyn Recognizer>) -> Self {
        match kind {
            EngineKind::LocalOcr => self.local_ocr = recognizer,
            EngineKind::RemoteMultimodal => self.remote = recognizer,
            EngineKind::LocalMultimodal => self.local = recognizer,
        }
        self
    }

    pub fn get(&self, kind: EngineKind) -> &Arc<dyn Recognizer> {
        match kind {
            EngineKind::LocalOcr => &self.local_ocr,
            EngineKind::RemoteMultimodal => &self.remote,
            EngineKind::LocalMultimodal => &self.local,
        }
    }
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSet")
            .field("local_ocr", &self.local_ocr.kind())
            .field("remote", &self.remote.kind())
            .field("local", &self.local.kind())
            .finish()
    }
}

// ── HTTP classification ──────────────────────────────────────────────────

/// Classify a non-success HTTP response.
///
/// `throttled` is what 429 maps to: `RateLimited` for hosted providers,
/// `EngineUnavailable` for a local server that has no quota to wait out.
pub(crate) fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    throttled: ErrorKind,
) -> RecognitionError {
    let message = format!("HTTP {}: {}", status.as_u16(), snippet(body));
    if status == StatusCode::TOO_MANY_REQUESTS {
        return match throttled {
            ErrorKind::RateLimited => {
                RecognitionError::rate_limited(message, parse_retry_after(headers))
            }
            other => RecognitionError::new(other, message),
        };
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return RecognitionError::transient(message);
    }
    RecognitionError::processing(message)
}

/// Classify a transport-level failure (no HTTP response at all).
pub(crate) fn classify_transport(e: &reqwest::Error, refused: ErrorKind) -> RecognitionError {
    if e.is_timeout() {
        RecognitionError::transient(format!("request timed out: {}", e))
    } else if e.is_connect() {
        RecognitionError::new(refused, format!("connection failed: {}", e))
    } else if e.is_decode() {
        RecognitionError::processing(format!("malformed response: {}", e))
    } else {
        RecognitionError::transient(e.to_string())
    }
}

/// `Retry-After: <seconds>`; HTTP-date values are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// First 200 chars of a response body, single-line.
pub(crate) fn snippet(body: &str) -> String {
    let flat: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(200) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat,
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, OcrflowError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| OcrflowError::InvalidConfig(format!("HTTP client: {}", e)))
}
