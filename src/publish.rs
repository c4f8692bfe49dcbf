//! Result Publisher: write the assembled text to object storage.
//!
//! The pipeline only needs "put bytes, get a URL back", captured by the
//! [`ObjectStore`] trait. [`OpendalObjectStore`] implements it over an
//! OpenDAL operator so the same code targets MinIO/S3, a local directory or
//! process memory; the shape of the returned reference depends on the
//! backend (presigned GET, `file://` URL, `memory://` key).

use crate::config::{ObjectStoreBackend, ObjectStoreConfig};
use crate::error::{OcrflowError, StorageError};
use crate::task::TaskId;
use async_trait::async_trait;
use opendal::{services, Operator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Opaque "put bytes, get URL" capability.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return a reference a caller can fetch.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
}

#[derive(Debug, Clone)]
enum UrlStyle {
    Presigned(Duration),
    File(PathBuf),
    Memory,
}

/// [`ObjectStore`] backed by an OpenDAL [`Operator`].
#[derive(Debug, Clone)]
pub struct OpendalObjectStore {
    op: Operator,
    urls: UrlStyle,
}

impl OpendalObjectStore {
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self, OcrflowError> {
        let connect = |e: opendal::Error| OcrflowError::InvalidConfig(format!("object store: {}", e));
        match &config.backend {
            ObjectStoreBackend::Memory => Self::memory(),
            ObjectStoreBackend::Fs { root } => {
                let root = std::path::absolute(root).map_err(|e| {
                    OcrflowError::InvalidConfig(format!(
                        "object store root {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                let op = Operator::new(services::Fs::default().root(&root.to_string_lossy()))
                    .map(|op| op.finish())
                    .map_err(connect)?;
                Ok(Self {
                    op,
                    urls: UrlStyle::File(root),
                })
            }
            ObjectStoreBackend::S3 {
                endpoint,
                bucket,
                region,
                access_key,
                secret_key,
            } => {
                let builder = services::S3::default()
                    .bucket(bucket)
                    .endpoint(endpoint)
                    .region(region)
                    .access_key_id(access_key)
                    .secret_access_key(secret_key);
                let op = Operator::new(builder)
                    .map(|op| op.finish())
                    .map_err(connect)?;
                Ok(Self {
                    op,
                    urls: UrlStyle::Presigned(config.presign_ttl),
                })
            }
        }
    }

    /// In-process store; refs look like `memory://<key>`.
    pub fn memory() -> Result<Self, OcrflowError> {
        let op = Operator::new(services::Memory::default())
            .map(|op| op.finish())
            .map_err(|e| OcrflowError::Internal(format!("memory object store: {}", e)))?;
        Ok(Self {
            op,
            urls: UrlStyle::Memory,
        })
    }

    /// Read back a stored object (CLI output, tests).
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.op
            .read(key)
            .await
            .map(|buf| buf.to_vec())
            .map_err(|e| StorageError {
                key: key.to_string(),
                detail: e.to_string(),
            })
    }
}

#[async_trait]
impl ObjectStore for OpendalObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let fail = |e: opendal::Error| StorageError {
            key: key.to_string(),
            detail: e.to_string(),
        };
        let len = bytes.len();
        self.op
            .write_with(key, bytes)
            .content_type("text/plain; charset=utf-8")
            .await
            .map_err(fail)?;
        debug!("Stored {} bytes at '{}'", len, key);

        Ok(match &self.urls {
            UrlStyle::Presigned(ttl) => self
                .op
                .presign_read(key, *ttl)
                .await
                .map_err(fail)?
                .uri()
                .to_string(),
            UrlStyle::File(root) => format!("file://{}", root.join(key).display()),
            UrlStyle::Memory => format!("memory://{}", key),
        })
    }
}

/// Publishes a task's text under `{task_id}{suffix}`.
#[derive(Clone)]
pub struct ResultPublisher {
    store: Arc<dyn ObjectStore>,
    suffix: String,
}

impl ResultPublisher {
    pub fn new(store: Arc<dyn ObjectStore>, suffix: impl Into<String>) -> Self {
        Self {
            store,
            suffix: suffix.into(),
        }
    }

    pub fn key_for(&self, id: TaskId) -> String {
        format!("{}{}", id, self.suffix)
    }

    /// Write `text` and return the reference to record on the task.
    pub async fn publish(&self, id: TaskId, text: &str) -> Result<String, StorageError> {
        let key = self.key_for(id);
        let url = self.store.put(&key, text.as_bytes().to_vec()).await?;
        info!(task_id = %id, "Published result to {}", key);
        Ok(url)
    }
}

impl std::fmt::Debug for ResultPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPublisher")
            .field("suffix", &self.suffix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = OpendalObjectStore::memory().unwrap();
        let url = store.put("a.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(url, "memory://a.txt");
        assert_eq!(store.get("a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn fs_store_returns_file_url() {
        let dir = TempDir::new().unwrap();
        let store = OpendalObjectStore::from_config(&ObjectStoreConfig {
            backend: ObjectStoreBackend::Fs {
                root: dir.path().to_path_buf(),
            },
            ..ObjectStoreConfig::default()
        })
        .unwrap();
        let url = store.put("x.txt", b"text".to_vec()).await.unwrap();
        assert!(url.starts_with("file://"), "{url}");
        assert!(url.ends_with("x.txt"));
        let on_disk = std::fs::read(dir.path().join("x.txt")).unwrap();
        assert_eq!(on_disk, b"text");
    }

    #[tokio::test]
    async fn s3_store_presigns_without_network() {
        let store = OpendalObjectStore::from_config(&ObjectStoreConfig {
            backend: ObjectStoreBackend::S3 {
                endpoint: "http://127.0.0.1:9".into(),
                bucket: "results".into(),
                region: "us-east-1".into(),
                access_key: "ak".into(),
                secret_key: "sk".into(),
            },
            ..ObjectStoreConfig::default()
        })
        .unwrap();
        let url = store
            .op
            .presign_read("t.txt", Duration::from_secs(60))
            .await
            .unwrap()
            .uri()
            .to_string();
        assert!(url.contains("results/t.txt"), "{url}");
        assert!(url.contains("X-Amz-Expires=60"), "{url}");
    }

    #[tokio::test]
    async fn publisher_keys_by_task_id() {
        let store = Arc::new(OpendalObjectStore::memory().unwrap());
        let publisher = ResultPublisher::new(store.clone(), ".txt");
        let id = TaskId::new();
        let url = publisher.publish(id, "总计").await.unwrap();
        assert_eq!(url, format!("memory://{id}.txt"));
        assert_eq!(store.get(&publisher.key_for(id)).await.unwrap(), "总计".as_bytes());
    }
}
