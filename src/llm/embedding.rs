//! The sentence-embedding seam.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EmbedError {
    #[error("embedder transport error: {0}")]
    #[diagnostic(code(findry::embed::transport))]
    Transport(String),

    #[error("embedder returned HTTP {status}")]
    #[diagnostic(code(findry::embed::http_status))]
    HttpStatus { status: u16 },

    #[error("embedding dimension mismatch: got {got}, expected {expected}")]
    #[diagnostic(
        code(findry::embed::dimension),
        help("models.embedding.dimension must match the embedder's output size")
    )]
    DimensionMismatch { got: usize, expected: usize },
}

/// Text-to-vector seam. Implementations must return unit-normalized vectors
/// of a fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// HTTP embedder against an Ollama-compatible `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsReply {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&serde_json::json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(|err| EmbedError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let reply: EmbeddingsReply = response
            .json()
            .await
            .map_err(|err| EmbedError::Transport(err.to_string()))?;

        Ok(normalize(reply.embedding))
    }
}

/// Scale a vector to unit length. Zero vectors pass through unchanged.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Embedding access serialized by an exclusive lock.
///
/// The encoder is a single shared resource (one model instance on one
/// device); concurrent callers queue here rather than in the backend. Also
/// enforces the configured dimension on every result.
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    lock: tokio::sync::Mutex<()>,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            embedder,
            lock: tokio::sync::Mutex::new(()),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let _guard = self.lock.lock().await;
        let vector = self.embedder.encode(text).await?;
        if vector.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                got: vector.len(),
                expected: self.dimension,
            });
        }
        Ok(vector)
    }

    /// The documented fallback for failed embeddings: a zero vector of the
    /// configured dimension. Callers must record `embedding_ok = false`.
    pub fn zero_vector(&self) -> Vec<f32> {
        vec![0.0; self.dimension]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn encode(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn normalize_produces_unit_length() {
        let v = normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn service_rejects_wrong_dimension() {
        let service = EmbeddingService::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), 3);
        let err = service.encode("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                got: 2,
                expected: 3
            }
        ));
    }

    #[tokio::test]
    async fn zero_vector_has_configured_dimension() {
        let service = EmbeddingService::new(Arc::new(FixedEmbedder(vec![0.0; 4])), 4);
        assert_eq!(service.zero_vector().len(), 4);
    }
}
