//! Remote multimodal variant: OpenAI-compatible `chat/completions`.
//!
//! ## Message Layout
//!
//! One user message with two content parts: the extraction prompt as text,
//! then the page as a `data:` URL image. Providers that speak the OpenAI
//! wire format (SiliconFlow, vLLM, LiteLLM, OpenAI itself) all accept it.

use super::{classify_status, classify_transport, http_client, ProbeReport};
use crate::config::RemoteMultimodalConfig;
use crate::error::{ErrorKind, OcrflowError, RecognitionError};
use crate::pipeline::encode::data_url;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::split::PageUnit;
use crate::task::EngineKind;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RemoteMultimodalEngine {
    client: reqwest::Client,
    config: RemoteMultimodalConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteMultimodalEngine {
    pub fn new(config: RemoteMultimodalConfig) -> Result<Self, OcrflowError> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'))
    }

    pub async fn recognize(&self, unit: &PageUnit) -> Result<String, RecognitionError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(RecognitionError::unavailable(
                "remote multimodal API key is not configured",
            ));
        };

        let request = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: [
                    ContentPart::Text {
                        text: &self.config.prompt,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_url(unit),
                        },
                    },
                ],
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(&e, ErrorKind::TransientNetwork))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body, ErrorKind::RateLimited));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(&e, ErrorKind::TransientNetwork))?;
        debug!(
            page = unit.index + 1,
            model = %self.config.model,
            "Remote model answered in {:?}",
            start.elapsed()
        );

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(RecognitionError::processing("model returned no content"));
        }
        Ok(clean_text(&content))
    }

    /// Configuration-only check; hosted APIs are not pinged.
    pub fn probe(&self) -> ProbeReport {
        ProbeReport {
            kind: EngineKind::RemoteMultimodal,
            available: self.has_api_key(),
            detail: if self.has_api_key() {
                format!("{} via {}", self.config.model, self.config.api_url)
            } else {
                "no API key configured".to_string()
            },
        }
    }
}
