//! Local multimodal variant: an Ollama server on the same host or LAN.
//!
//! A local server has no provider quota to wait out, so throttling (429)
//! and a refused connection both mean the engine is unavailable right now.
//! A model that was never pulled (404) is a permanent failure: retrying
//! cannot fix it, `ollama pull` can.

use super::{classify_status, classify_transport, http_client, ProbeReport};
use crate::config::LocalMultimodalConfig;
use crate::error::{ErrorKind, OcrflowError, RecognitionError};
use crate::pipeline::encode::to_base64;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::split::PageUnit;
use crate::task::EngineKind;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalMultimodalEngine {
    client: reqwest::Client,
    config: LocalMultimodalConfig,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    images: [String; 1],
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl LocalMultimodalEngine {
    pub fn new(config: LocalMultimodalConfig) -> Result<Self, OcrflowError> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    pub async fn recognize(&self, unit: &PageUnit) -> Result<String, RecognitionError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt: &self.config.prompt,
            stream: false,
            images: [to_base64(unit)],
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };

        let start = Instant::now();
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(&e, ErrorKind::EngineUnavailable))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::processing(format!(
                "model '{}' not available on {}: {}",
                self.config.model,
                self.config.base_url,
                super::snippet(&body)
            )));
        }
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status,
                &headers,
                &body,
                ErrorKind::EngineUnavailable,
            ));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(&e, ErrorKind::EngineUnavailable))?;
        debug!(
            page = unit.index + 1,
            model = %self.config.model,
            "Local model answered in {:?}",
            start.elapsed()
        );
        Ok(clean_text(&parsed.response))
    }

    /// Check the server is up and the configured model has been pulled.
    pub async fn probe(&self) -> ProbeReport {
        let report = |available, detail: String| ProbeReport {
            kind: EngineKind::LocalMultimodal,
            available,
            detail,
        };
        let response = match self.client.get(self.url("/api/tags")).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => return report(false, format!("{} answered HTTP {}", self.config.base_url, r.status())),
            Err(e) => return report(false, format!("{} unreachable: {}", self.config.base_url, e)),
        };
        match response.json::<TagsResponse>().await {
            Ok(tags) => {
                let wanted = &self.config.model;
                let latest = format!("{wanted}:latest");
                if tags.models.iter().any(|m| &m.name == wanted || m.name == latest) {
                    report(true, format!("{wanted} ready"))
                } else {
                    report(false, format!("{wanted} not pulled (run `ollama pull {wanted}`)"))
                }
            }
            Err(e) => report(false, format!("unexpected /api/tags response: {e}")),
        }
    }
}
