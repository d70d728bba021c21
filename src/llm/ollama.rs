//! The raw generation seam and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from model runtime access.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("model request timed out after {0:?}")]
    #[diagnostic(code(findry::llm::timeout))]
    Timeout(Duration),

    #[error("model runtime returned HTTP {status}")]
    #[diagnostic(code(findry::llm::http_status))]
    HttpStatus { status: u16 },

    #[error("transport error: {0}")]
    #[diagnostic(code(findry::llm::transport))]
    Transport(String),

    #[error("model returned an empty response")]
    #[diagnostic(code(findry::llm::empty))]
    Empty,

    #[error("response failed validation")]
    #[diagnostic(code(findry::llm::validation))]
    ValidationFailed,

    #[error("response was not valid JSON: {0}")]
    #[diagnostic(code(findry::llm::invalid_json))]
    InvalidJson(#[from] serde_json::Error),

    #[error("model call failed after {attempts} attempts: {last_error}")]
    #[diagnostic(
        code(findry::llm::exhausted),
        help("Check that the model runtime is reachable and the model is pulled.")
    )]
    Exhausted { attempts: u32, last_error: String },
}

/// One generation request against a named model.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    /// Ask the runtime for strict JSON output. Suppressed by the client for
    /// model families known to break under it.
    pub format_json: bool,
    /// Enable the runtime's chain-of-thought stream when supported.
    pub think: bool,
    /// Base64-encoded images for vision models.
    pub images: Vec<String>,
    /// Token budget hint for the runtime.
    pub num_predict: Option<u32>,
    pub timeout: Duration,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.3,
            format_json: false,
            think: false,
            images: Vec::new(),
            num_predict: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// A completed generation.
#[derive(Clone, Debug, Default)]
pub struct GenerateResponse {
    pub text: String,
    /// Chain-of-thought content when the runtime emits one.
    pub thinking: Option<String>,
}

/// The raw model seam. Implementations perform exactly one call with no
/// retry policy of their own; [`crate::llm::LlmClient`] owns retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmError>;
}

/// HTTP client for an Ollama-compatible `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaGenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    think: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaGenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    thinking: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let body = OllamaGenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            think: request.think,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.num_predict,
            },
            format: request.format_json.then_some("json"),
            images: request.images.clone(),
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout(request.timeout)
                } else {
                    LlmError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let reply: OllamaGenerateReply = response
            .json()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let text = reply.response.trim().to_string();
        let thinking = reply.thinking.filter(|t| !t.is_empty());
        if let Some(t) = &thinking {
            tracing::debug!(target: "findry::llm", chars = t.len(), "thinking captured");
        }

        Ok(GenerateResponse { text, thinking })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn posts_generate_body_and_parses_reply() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"model": "qwen3:8b", "stream": false}"#);
            then.status(200)
                .json_body(serde_json::json!({"response": "  hello  ", "thinking": "hmm"}));
        });

        let client = OllamaClient::new(server.base_url());
        let reply = client
            .generate(GenerateRequest::new("qwen3:8b", "hi"))
            .await
            .unwrap();
        mock.assert();
        assert_eq!(reply.text, "hello");
        assert_eq!(reply.thinking.as_deref(), Some("hmm"));
    }

    #[tokio::test]
    async fn non_success_status_maps_to_http_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(500);
        });

        let client = OllamaClient::new(server.base_url());
        let err = client
            .generate(GenerateRequest::new("qwen3:8b", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::HttpStatus { status: 500 }));
    }
}
