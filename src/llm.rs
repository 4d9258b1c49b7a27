//! Language-model seam: trait, request/response types, and the
//! OpenAI-compatible HTTP client.
//!
//! Every external call in the system — vision captions during enrichment,
//! document selection during retrieval — goes through the [`LanguageModel`]
//! trait. The trait is deliberately tiny (one method) so tests can inject a
//! deterministic stub via [`crate::config::PipelineConfig::model`] and
//! exercise the full pipeline without network access or API cost.
//!
//! The production implementation, [`OpenAiClient`], speaks the OpenAI chat
//! completions protocol: data-URI image attachments for vision requests and
//! `response_format: json_object` for machine-parsable retrieval answers.

use crate::config::PipelineConfig;
use crate::error::SiftError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// A base64-encoded image ready for a vision API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub data: String,
    pub mime_type: &'static str,
}

impl ImageData {
    /// Wrap already-encoded PNG bytes.
    pub fn from_png_bytes(png: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(png),
            mime_type: "image/png",
        }
    }

    /// Render as the `data:` URI the chat completions API expects.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// One request to the model: prompt text, optional system message and
/// images, and sampling limits.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub images: Vec<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Ask the API to constrain output to a single JSON object.
    pub json_response: bool,
}

/// The model's answer plus token accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Errors from a single model call. All of these are candidates for retry;
/// the retry policy lives with the caller, not here.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Http(String),

    /// The API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The API answered 200 but with no usable choice.
    #[error("API response contained no content")]
    EmptyResponse,
}

/// The single seam between this crate and any external model.
///
/// Implementations must be cheap to share (`Send + Sync`); the pipeline
/// holds one instance behind an `Arc` and calls it from up to
/// `concurrency` workers at once.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

/// OpenAI-compatible chat completions client.
#[derive(Debug)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self, SiftError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SiftError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            api_key,
            model,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    /// Point the client at a non-default endpoint (proxy, compatible server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build a client from the `OPENAI_API_KEY` environment variable.
    pub fn from_env(model: String, timeout_secs: u64) -> Result<Self, SiftError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SiftError::ProviderNotConfigured {
                hint: "Set OPENAI_API_KEY, or inject a model via PipelineConfig::builder().model(...)."
                    .to_string(),
            })?;
        Self::new(api_key, model, timeout_secs)
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({"role": "system", "content": system}));
        }

        // Text-only requests send a plain string; vision requests use the
        // content-part array with data-URI image attachments.
        let user_content = if request.images.is_empty() {
            json!(request.user)
        } else {
            let mut parts = vec![json!({"type": "text", "text": request.user})];
            for image in &request.images {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": image.to_data_uri()}
                }));
            }
            json!(parts)
        };
        messages.push(json!({"role": "user", "content": user_content}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_response {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let body = self.build_body(request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Http(format!("response parse: {e}")))?;

        let usage = parsed.usage.unwrap_or_default();
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(
            "Model call: {} prompt tokens, {} completion tokens",
            usage.prompt_tokens, usage.completion_tokens
        );

        Ok(Completion {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

/// Resolve the model for a run: the injected instance when present,
/// otherwise an [`OpenAiClient`] from the environment.
pub fn resolve_model(
    config: &PipelineConfig,
) -> Result<std::sync::Arc<dyn LanguageModel>, SiftError> {
    if let Some(ref model) = config.model {
        return Ok(std::sync::Arc::clone(model));
    }
    let client = OpenAiClient::from_env(config.model_name.clone(), config.api_timeout_secs)?;
    Ok(std::sync::Arc::new(client))
}

// ── Response wire types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_format() {
        let img = ImageData::from_png_bytes(b"\x89PNG\r\n");
        let uri = img.to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));
        let b64 = uri.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(STANDARD.decode(b64).unwrap(), b"\x89PNG\r\n");
    }

    #[test]
    fn text_only_body_uses_plain_content() {
        let client = OpenAiClient::new("k".into(), "gpt-4o".into(), 60).unwrap();
        let body = client.build_body(&CompletionRequest {
            system: None,
            user: "pick one".into(),
            images: vec![],
            temperature: 0.0,
            max_tokens: 100,
            json_response: true,
        });
        assert_eq!(body["messages"][0]["content"], "pick one");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn vision_body_attaches_images() {
        let client = OpenAiClient::new("k".into(), "gpt-4o".into(), 60).unwrap();
        let body = client.build_body(&CompletionRequest {
            system: Some("describe".into()),
            user: "page text".into(),
            images: vec![ImageData::from_png_bytes(b"png")],
            temperature: 0.0,
            max_tokens: 100,
            json_response: false,
        });
        assert_eq!(body["messages"][0]["role"], "system");
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn missing_env_key_is_provider_error() {
        // Scoped: clear then restore so parallel tests are unaffected as
        // little as possible.
        let saved = std::env::var("OPENAI_API_KEY").ok();
        std::env::remove_var("OPENAI_API_KEY");
        let err = OpenAiClient::from_env("gpt-4o".into(), 60).unwrap_err();
        assert!(matches!(err, SiftError::ProviderNotConfigured { .. }));
        if let Some(k) = saved {
            std::env::set_var("OPENAI_API_KEY", k);
        }
    }
}
