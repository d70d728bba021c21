//! Retry, validation, and fallback policy around the raw model seam.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use serde_json::Value;

use super::model_manager::ModelManager;
use super::ollama::{GenerateRequest, LanguageModel, LlmError};
use super::sanitize::sanitize_json_response;

/// Validator predicate applied to the raw response text before acceptance.
pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One logical model call as issued by an agent.
#[derive(Clone)]
pub struct LlmRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub think: bool,
    pub images: Vec<String>,
    pub num_predict: Option<u32>,
    /// Returned verbatim when every retry fails.
    pub fallback: Option<String>,
    pub validator: Option<Validator>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.3,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            think: false,
            images: Vec::new(),
            num_predict: None,
            fallback: None,
            validator: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn think(mut self, enabled: bool) -> Self {
        self.think = enabled;
        self
    }

    pub fn images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn num_predict(mut self, tokens: u32) -> Self {
        self.num_predict = Some(tokens);
        self
    }

    pub fn fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// A validated reply, with the thinking stream when the runtime emitted one.
#[derive(Clone, Debug, Default)]
pub struct LlmReply {
    pub text: String,
    pub thinking: Option<String>,
}

/// The single entry point agents use for model calls.
///
/// Guarantees the model is loaded before the first call, retries transient
/// failures with bounded linear backoff, and resolves to either a valid
/// value or the caller's explicit fallback. Callers therefore never observe
/// partial failures; [`LlmError::Exhausted`] only escapes when no fallback
/// was supplied.
pub struct LlmClient {
    model: Arc<dyn LanguageModel>,
    manager: Arc<ModelManager>,
}

impl LlmClient {
    pub fn new(model: Arc<dyn LanguageModel>, manager: Arc<ModelManager>) -> Self {
        Self { model, manager }
    }

    /// Free-text generation with retry and fallback.
    pub async fn generate(&self, request: LlmRequest) -> Result<LlmReply, LlmError> {
        self.generate_inner(request, false).await
    }

    /// Structured-JSON generation.
    ///
    /// The runtime's JSON format mode is requested except for model families
    /// known to break under it; the response is sanitized and parsed either
    /// way. On total failure the fallback value is returned when provided.
    pub async fn generate_json(
        &self,
        mut request: LlmRequest,
        fallback: Option<Value>,
    ) -> Result<Value, LlmError> {
        let format_json = !json_format_unsupported(&request.model);
        if request.validator.is_none() {
            request.validator = Some(Arc::new(|text: &str| {
                serde_json::from_str::<Value>(&sanitize_json_response(text)).is_ok()
            }));
        }
        // Fallback handling happens after parsing, not on the text layer.
        request.fallback = None;

        match self.generate_inner(request, format_json).await {
            Ok(reply) => {
                let cleaned = sanitize_json_response(&reply.text);
                match serde_json::from_str::<Value>(&cleaned) {
                    Ok(value) => Ok(value),
                    Err(err) => match fallback {
                        Some(value) => {
                            tracing::warn!(
                                target: "findry::llm",
                                error = %err,
                                "JSON parse failed; using fallback data"
                            );
                            Ok(value)
                        }
                        None => Err(LlmError::InvalidJson(err)),
                    },
                }
            }
            Err(err) => match fallback {
                Some(value) => {
                    tracing::warn!(
                        target: "findry::llm",
                        error = %err,
                        "model call failed; using fallback data"
                    );
                    Ok(value)
                }
                None => Err(err),
            },
        }
    }

    async fn generate_inner(
        &self,
        request: LlmRequest,
        format_json: bool,
    ) -> Result<LlmReply, LlmError> {
        if let Err(err) = self.manager.ensure_loaded(&request.model).await {
            tracing::warn!(
                target: "findry::llm",
                model = %request.model,
                error = %err,
                "model preload failed; proceeding anyway"
            );
        }

        let attempts = request.max_retries.max(1);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..attempts {
            let raw = GenerateRequest {
                model: request.model.clone(),
                prompt: request.prompt.clone(),
                temperature: request.temperature,
                format_json,
                think: request.think,
                images: request.images.clone(),
                num_predict: request.num_predict,
                timeout: request.timeout,
            };

            match self.model.generate(raw).await {
                Ok(reply) => {
                    if reply.text.is_empty() {
                        last_error = Some(LlmError::Empty);
                        backoff(attempt, Duration::from_millis(500)).await;
                        continue;
                    }
                    if let Some(validator) = &request.validator
                        && !validator(&reply.text)
                    {
                        tracing::warn!(
                            target: "findry::llm",
                            attempt = attempt + 1,
                            "response failed validation"
                        );
                        last_error = Some(LlmError::ValidationFailed);
                        backoff(attempt, Duration::from_millis(500)).await;
                        continue;
                    }
                    return Ok(LlmReply {
                        text: reply.text,
                        thinking: reply.thinking,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        target: "findry::llm",
                        attempt = attempt + 1,
                        error = %err,
                        "model call failed"
                    );
                    last_error = Some(err);
                    backoff(attempt, Duration::from_secs(1)).await;
                }
            }
        }

        match request.fallback {
            Some(text) => {
                tracing::warn!(
                    target: "findry::llm",
                    model = %request.model,
                    "all retries failed; using fallback response"
                );
                Ok(LlmReply {
                    text,
                    thinking: None,
                })
            }
            None => Err(LlmError::Exhausted {
                attempts,
                last_error: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            }),
        }
    }
}

/// Some vision model families reject the runtime's strict JSON mode; for
/// those, rely on prompting plus sanitized extraction instead.
fn json_format_unsupported(model: &str) -> bool {
    let name = model.to_lowercase();
    name.contains("qwen") || name.contains("vl")
}

/// Linear backoff scaled by attempt number, with a little jitter so
/// concurrent retries don't stampede the runtime.
async fn backoff(attempt: u32, unit: Duration) {
    let base = unit * (attempt + 1);
    let jitter = rand::rng().random_range(0.0..0.25_f64);
    tokio::time::sleep(base.mul_f64(1.0 + jitter)).await;
}
