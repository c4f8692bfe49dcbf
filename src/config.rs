//! Configuration types for the recognition service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`] or loaded from the environment with
//! [`ServiceConfig::from_env`]. Keeping every knob in one struct makes it
//! trivial to share across workers and to log at startup: secrets are
//! redacted in the `Debug` output, so `debug!("{:?}", config)` is safe.

use crate::error::OcrflowError;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ── Engine configs ───────────────────────────────────────────────────────

/// Local OCR binary (tesseract).
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOcrConfig {
    /// Executable name or path. Default: `tesseract`.
    pub binary: PathBuf,
    /// `-l` argument. Default: `chi_sim+eng`.
    pub languages: String,
    /// Per-invocation timeout. Default: 120 s.
    pub timeout: Duration,
}

impl Default for LocalOcrConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            languages: "chi_sim+eng".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Hosted OpenAI-compatible multimodal API (SiliconFlow by default).
#[derive(Clone, PartialEq)]
pub struct RemoteMultimodalConfig {
    /// Base URL; `/chat/completions` is appended.
    pub api_url: String,
    /// Bearer token. Without one the engine reports `EngineUnavailable`.
    pub api_key: Option<String>,
    pub model: String,
    pub prompt: String,
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,
    /// Default: 4000.
    pub max_tokens: u32,
    /// Per-request timeout. Default: 60 s.
    pub timeout: Duration,
}

impl Default for RemoteMultimodalConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.siliconflow.com/v1".to_string(),
            api_key: None,
            model: "Pro/Qwen/Qwen2-VL-7B-Instruct".to_string(),
            prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            temperature: 0.1,
            max_tokens: 4000,
            timeout: Duration::from_secs(60),
        }
    }
}

impl fmt::Debug for RemoteMultimodalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMultimodalConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Locally hosted model server speaking the Ollama API.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMultimodalConfig {
    /// Default: `http://localhost:11434`.
    pub base_url: String,
    /// Default: `llama3.2-vision:11b`.
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    /// Per-request timeout. Default: 120 s (local models are slow).
    pub timeout: Duration,
}

impl Default for LocalMultimodalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2-vision:11b".to_string(),
            prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            temperature: 0.1,
            timeout: Duration::from_secs(120),
        }
    }
}

// ── Object storage ───────────────────────────────────────────────────────

/// Where published results go.
#[derive(Clone, PartialEq)]
pub enum ObjectStoreBackend {
    /// Process memory; results vanish on exit. Tests and dry runs.
    Memory,
    /// A local directory; result refs are `file://` URLs.
    Fs { root: PathBuf },
    /// S3 or MinIO; result refs are presigned GET URLs.
    S3 {
        endpoint: String,
        bucket: String,
        region: String,
        access_key: String,
        secret_key: String,
    },
}

impl fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStoreBackend::Memory => f.write_str("Memory"),
            ObjectStoreBackend::Fs { root } => f.debug_struct("Fs").field("root", root).finish(),
            ObjectStoreBackend::S3 {
                endpoint,
                bucket,
                region,
                ..
            } => f
                .debug_struct("S3")
                .field("endpoint", endpoint)
                .field("bucket", bucket)
                .field("region", region)
                .field("access_key", &"<redacted>")
                .field("secret_key", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStoreConfig {
    pub backend: ObjectStoreBackend,
    /// Lifetime of presigned result URLs. Default: 7 days.
    pub presign_ttl: Duration,
    /// Appended to the task id to form the object key. Default: `.txt`.
    pub suffix: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::Fs {
                root: PathBuf::from("ocrflow-results"),
            },
            presign_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            suffix: ".txt".to_string(),
        }
    }
}

// ── Service config ───────────────────────────────────────────────────────

/// Configuration for the whole recognition service.
///
/// # Example
/// ```rust
/// use ocrflow::config::{ObjectStoreBackend, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .workers(2)
///     .object_store_backend(ObjectStoreBackend::Memory)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 2);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Concurrent workers, each running one task at a time. Default: 4.
    ///
    /// Retry sleeps happen inside the worker, so a pool of N can be blocked
    /// for up to the worst-case backoff of N rate-limited pages. Size for
    /// that, not for CPU count.
    pub workers: usize,
    pub retry: RetryPolicy,
    pub local_ocr: LocalOcrConfig,
    pub remote: RemoteMultimodalConfig,
    pub local: LocalMultimodalConfig,
    pub object_store: ObjectStoreConfig,
    /// How page texts are joined in the published result.
    pub page_separator: PageSeparator,
    /// Delete the uploaded source file once its task is terminal. Default: false.
    pub remove_source_on_finish: bool,
    /// Directory containing the pdfium shared library; `None` searches the
    /// system library path.
    pub pdfium_library_path: Option<PathBuf>,
    /// Longest rendered edge of a PDF page, in pixels. Default: 2000.
    pub render_max_pixels: u32,
    /// Per-task progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            local_ocr: LocalOcrConfig::default(),
            remote: RemoteMultimodalConfig::default(),
            local: LocalMultimodalConfig::default(),
            object_store: ObjectStoreConfig::default(),
            page_separator: PageSeparator::default(),
            remove_source_on_finish: false,
            pdfium_library_path: None,
            render_max_pixels: 2000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("workers", &self.workers)
            .field("retry", &self.retry)
            .field("local_ocr", &self.local_ocr)
            .field("remote", &self.remote)
            .field("local", &self.local)
            .field("object_store", &self.object_store)
            .field("page_separator", &self.page_separator)
            .field("remove_source_on_finish", &self.remove_source_on_finish)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("render_max_pixels", &self.render_max_pixels)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn TaskProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder seeded with defaults.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `OCRFLOW_WORKERS` | `workers` |
    /// | `OCRFLOW_TESSERACT_BIN`, `OCRFLOW_TESSERACT_LANGS` | `local_ocr` |
    /// | `OCRFLOW_REMOTE_API_URL`, `OCRFLOW_REMOTE_API_KEY`, `OCRFLOW_REMOTE_MODEL` | `remote` |
    /// | `OLLAMA_BASE_URL`, `OCRFLOW_OLLAMA_MODEL` | `local` |
    /// | `MINIO_ENDPOINT`, `MINIO_ACCESS_KEY`, `MINIO_SECRET_KEY`, `MINIO_BUCKET_NAME`, `MINIO_REGION`, `MINIO_SECURE` | S3 object store |
    /// | `OCRFLOW_OUTPUT_DIR` | fs object store root (when no MinIO endpoint) |
    ///
    /// `SILICON_FLOW_API_KEY` / `SILICON_FLOW_API_URL` are accepted as
    /// fallbacks for the remote engine.
    pub fn from_env() -> Result<Self, OcrflowError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    }

    /// [`ServiceConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, OcrflowError> {
        let mut b = Self::builder();

        if let Some(v) = get("OCRFLOW_WORKERS") {
            b = b.workers(parse_var("OCRFLOW_WORKERS", &v)?);
        }

        if let Some(v) = get("OCRFLOW_TESSERACT_BIN") {
            b.config.local_ocr.binary = PathBuf::from(v);
        }
        if let Some(v) = get("OCRFLOW_TESSERACT_LANGS") {
            b.config.local_ocr.languages = v;
        }

        if let Some(v) = get("OCRFLOW_REMOTE_API_URL").or_else(|| get("SILICON_FLOW_API_URL")) {
            b.config.remote.api_url = v;
        }
        b.config.remote.api_key =
            get("OCRFLOW_REMOTE_API_KEY").or_else(|| get("SILICON_FLOW_API_KEY"));
        if let Some(v) = get("OCRFLOW_REMOTE_MODEL") {
            b.config.remote.model = v;
        }

        if let Some(v) = get("OLLAMA_BASE_URL") {
            b.config.local.base_url = v;
        }
        if let Some(v) = get("OCRFLOW_OLLAMA_MODEL") {
            b.config.local.model = v;
        }

        if let Some(endpoint) = get("MINIO_ENDPOINT") {
            let secure = get("MINIO_SECURE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);
            let endpoint = if endpoint.contains("://") {
                endpoint
            } else if secure {
                format!("https://{endpoint}")
            } else {
                format!("http://{endpoint}")
            };
            b.config.object_store.backend = ObjectStoreBackend::S3 {
                endpoint,
                bucket: get("MINIO_BUCKET_NAME")
                    .unwrap_or_else(|| "pdf-ocr-markdown-bucket".to_string()),
                region: get("MINIO_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                access_key: get("MINIO_ACCESS_KEY").unwrap_or_default(),
                secret_key: get("MINIO_SECRET_KEY").unwrap_or_default(),
            };
        } else if let Some(dir) = get("OCRFLOW_OUTPUT_DIR") {
            b.config.object_store.backend = ObjectStoreBackend::Fs {
                root: PathBuf::from(dir),
            };
        }

        b.build()
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, OcrflowError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| OcrflowError::InvalidConfig(format!("{key}={value:?}: {e}")))
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn local_ocr(mut self, c: LocalOcrConfig) -> Self {
        self.config.local_ocr = c;
        self
    }

    pub fn remote(mut self, c: RemoteMultimodalConfig) -> Self {
        self.config.remote = c;
        self
    }

    pub fn remote_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.api_key = Some(key.into());
        self
    }

    pub fn local(mut self, c: LocalMultimodalConfig) -> Self {
        self.config.local = c;
        self
    }

    pub fn object_store(mut self, c: ObjectStoreConfig) -> Self {
        self.config.object_store = c;
        self
    }

    pub fn object_store_backend(mut self, backend: ObjectStoreBackend) -> Self {
        self.config.object_store.backend = backend;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn remove_source_on_finish(mut self, v: bool) -> Self {
        self.config.remove_source_on_finish = v;
        self
    }

    pub fn pdfium_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(dir.into());
        self
    }

    pub fn render_max_pixels(mut self, px: u32) -> Self {
        self.config.render_max_pixels = px.max(100);
        self
    }

    /// Set the same prompt on both multimodal engines.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.config.remote.prompt = prompt.clone();
        self.config.local.prompt = prompt;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, OcrflowError> {
        let c = &self.config;
        if c.workers == 0 {
            return Err(OcrflowError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        c.retry.validate()?;
        if c.object_store.suffix.is_empty() || c.object_store.suffix.contains('/') {
            return Err(OcrflowError::InvalidConfig(format!(
                "Result suffix must be non-empty and contain no '/', got {:?}",
                c.object_store.suffix
            )));
        }
        if c.object_store.presign_ttl.is_zero() {
            return Err(OcrflowError::InvalidConfig(
                "Presign TTL must be positive".into(),
            ));
        }
        if c.local_ocr.languages.trim().is_empty() {
            return Err(OcrflowError::InvalidConfig(
                "Tesseract languages must not be empty".into(),
            ));
        }
        if let ObjectStoreBackend::S3 { bucket, .. } = &c.object_store.backend {
            if bucket.is_empty() {
                return Err(OcrflowError::InvalidConfig("S3 bucket must be set".into()));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How page texts are joined in the published result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Pages joined with a blank line.
    None,
    /// A `--- page N ---` header before every page. (default)
    #[default]
    PageHeader,
    /// Horizontal rule between pages: "\n\n---\n\n"
    HorizontalRule,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Text placed before page `page_num` (1-indexed). `first` is true for
    /// the first page actually emitted.
    pub fn render(&self, page_num: usize, first: bool) -> String {
        match self {
            PageSeparator::PageHeader if first => format!("--- page {} ---\n", page_num),
            PageSeparator::PageHeader => format!("\n\n--- page {} ---\n", page_num),
            _ if first => String::new(),
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

impl FromStr for PageSeparator {
    type Err = String;

    /// `none`, `page-header`, `rule`, or any other string as a custom separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => PageSeparator::None,
            "page-header" | "header" => PageSeparator::PageHeader,
            "rule" | "hr" => PageSeparator::HorizontalRule,
            "" => return Err("separator must not be empty".to_string()),
            other => PageSeparator::Custom(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_build() {
        let c = ServiceConfig::builder().build().unwrap();
        assert_eq!(c.workers, 4);
        assert_eq!(c.local_ocr.languages, "chi_sim+eng");
        assert_eq!(c.remote.max_tokens, 4000);
        assert_eq!(c.local.model, "llama3.2-vision:11b");
        assert_eq!(c.object_store.suffix, ".txt");
        assert_eq!(c.page_separator, PageSeparator::PageHeader);
    }

    #[test]
    fn zero_workers_rejected() {
        let err = ServiceConfig::builder().workers(0).build().unwrap_err();
        assert!(matches!(err, OcrflowError::InvalidConfig(_)));
    }

    #[test]
    fn bad_suffix_rejected() {
        let mut store = ObjectStoreConfig::default();
        store.suffix = "a/b".into();
        assert!(ServiceConfig::builder().object_store(store).build().is_err());
    }

    #[test]
    fn env_minio_becomes_s3() {
        let c = ServiceConfig::from_lookup(lookup(&[
            ("MINIO_ENDPOINT", "minio.local:9000"),
            ("MINIO_ACCESS_KEY", "ak"),
            ("MINIO_SECRET_KEY", "sk"),
            ("MINIO_BUCKET_NAME", "ocr"),
        ]))
        .unwrap();
        match &c.object_store.backend {
            ObjectStoreBackend::S3 {
                endpoint, bucket, ..
            } => {
                assert_eq!(endpoint, "http://minio.local:9000");
                assert_eq!(bucket, "ocr");
            }
            other => panic!("expected S3, got {other:?}"),
        }
    }

    #[test]
    fn env_output_dir_and_engines() {
        let c = ServiceConfig::from_lookup(lookup(&[
            ("OCRFLOW_WORKERS", "8"),
            ("OCRFLOW_OUTPUT_DIR", "/srv/out"),
            ("SILICON_FLOW_API_KEY", "sk-test"),
            ("OLLAMA_BASE_URL", "http://gpu:11434"),
        ]))
        .unwrap();
        assert_eq!(c.workers, 8);
        assert_eq!(
            c.object_store.backend,
            ObjectStoreBackend::Fs {
                root: PathBuf::from("/srv/out")
            }
        );
        assert_eq!(c.remote.api_key.as_deref(), Some("sk-test"));
        assert_eq!(c.local.base_url, "http://gpu:11434");
    }

    #[test]
    fn env_bad_number_is_invalid_config() {
        let err = ServiceConfig::from_lookup(lookup(&[("OCRFLOW_WORKERS", "many")])).unwrap_err();
        assert!(err.to_string().contains("OCRFLOW_WORKERS"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = ServiceConfig::from_lookup(lookup(&[
            ("OCRFLOW_REMOTE_API_KEY", "sk-very-secret"),
            ("MINIO_ENDPOINT", "m:9000"),
            ("MINIO_SECRET_KEY", "minio-secret"),
        ]))
        .unwrap();
        let dbg = format!("{:?}", c);
        assert!(!dbg.contains("sk-very-secret"));
        assert!(!dbg.contains("minio-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn separator_rendering() {
        assert_eq!(PageSeparator::PageHeader.render(1, true), "--- page 1 ---\n");
        assert_eq!(PageSeparator::PageHeader.render(3, false), "\n\n--- page 3 ---\n");
        assert_eq!(PageSeparator::HorizontalRule.render(2, true), "");
        assert_eq!(PageSeparator::HorizontalRule.render(2, false), "\n\n---\n\n");
        assert_eq!("rule".parse::<PageSeparator>().unwrap(), PageSeparator::HorizontalRule);
        assert_eq!(
            "=====".parse::<PageSeparator>().unwrap(),
            PageSeparator::Custom("=====".into())
        );
    }
}
