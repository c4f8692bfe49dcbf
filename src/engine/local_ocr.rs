//! Local OCR variant: runs the tesseract binary on one unit.
//!
//! The unit is written to a private temp directory because tesseract reads
//! from a path; the directory is removed when the call returns. Failures are
//! classified from the process outcome:
//!
//! - spawn fails, exit 126/127, or missing language data → `EngineUnavailable`
//! - any other non-zero exit → `Processing` (the image itself was rejected)
//! - the per-call timeout elapses → `TransientNetwork`, like any timed-out
//!   backend call

use super::ProbeReport;
use crate::config::LocalOcrConfig;
use crate::error::RecognitionError;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::split::PageUnit;
use crate::task::EngineKind;
use std::io;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalOcrEngine {
    config: LocalOcrConfig,
}

impl LocalOcrEngine {
    pub fn new(config: LocalOcrConfig) -> Self {
        Self { config }
    }

    pub async fn recognize(&self, unit: &PageUnit) -> Result<String, RecognitionError> {
        let dir = tempfile::Builder::new()
            .prefix("ocrflow-")
            .tempdir()
            .map_err(|e| RecognitionError::unavailable(format!("cannot create temp dir: {}", e)))?;
        let path = dir
            .path()
            .join(format!("page-{}.{}", unit.index, unit.extension()));
        tokio::fs::write(&path, &unit.bytes)
            .await
            .map_err(|e| RecognitionError::unavailable(format!("cannot stage page image: {}", e)))?;

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg(&path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.languages)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(
            page = unit.index + 1,
            "Running {} -l {}",
            self.config.binary.display(),
            self.config.languages
        );
        let output = match timeout(self.config.timeout, cmd.output()).await {
            Err(_) => {
                return Err(RecognitionError::transient(format!(
                    "tesseract timed out after {}s",
                    self.config.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => return Err(self.spawn_error(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_exit(output.status.code(), &stderr));
        }
        Ok(clean_text(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Run `tesseract --version`.
    pub async fn probe(&self) -> ProbeReport {
        let run = Command::new(&self.config.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let (available, detail) = match timeout(self.config.timeout, run).await {
            Ok(Ok(out)) if out.status.success() => {
                // Older builds print the version on stderr.
                let text = if out.stdout.is_empty() { out.stderr } else { out.stdout };
                let first = String::from_utf8_lossy(&text)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                (true, first)
            }
            Ok(Ok(out)) => (false, format!("exited with {}", out.status)),
            Ok(Err(e)) => (false, self.spawn_error(e).message),
            Err(_) => (false, "timed out".to_string()),
        };
        ProbeReport {
            kind: EngineKind::LocalOcr,
            available,
            detail,
        }
    }

    fn spawn_error(&self, e: io::Error) -> RecognitionError {
        let what = match e.kind() {
            io::ErrorKind::NotFound => "not found",
            io::ErrorKind::PermissionDenied => "not executable",
            _ => "could not be started",
        };
        RecognitionError::unavailable(format!(
            "{} {}: {}",
            self.config.binary.display(),
            what,
            e
        ))
    }
}

fn classify_exit(code: Option<i32>, stderr: &str) -> RecognitionError {
    let stderr = super::snippet(stderr);
    let code_str = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    let missing_data = stderr.contains("Failed loading language")
        || stderr.contains("Error opening data file")
        || stderr.contains("Could not initialize tesseract");
    match code {
        Some(126) | Some(127) => {
            RecognitionError::unavailable(format!("tesseract exit {}: {}", code_str, stderr))
        }
        _ if missing_data => RecognitionError::unavailable(format!(
            "tesseract language data missing: {}",
            stderr
        )),
        _ => RecognitionError::processing(format!("tesseract exit {}: {}", code_str, stderr)),
    }
}
