//! Model runtime access: the single entry point for all LLM calls.
//!
//! Layers, bottom to top:
//!
//! - [`LanguageModel`]: the raw generation seam (HTTP to the model runtime;
//!   tests inject scripted fakes).
//! - [`LlmClient`]: retry/backoff, empty-response and validator checks, JSON
//!   sanitization, thinking capture, and explicit fallbacks. Agents only
//!   ever talk to this type.
//! - [`ModelManager`]: per-name load serialization and idle unloading.
//! - [`EmbeddingService`]: the sentence-embedding seam, serialized by an
//!   exclusive lock (single-encoder guarantee).

pub mod client;
pub mod embedding;
pub mod model_manager;
pub mod ollama;
pub mod sanitize;

pub use client::{LlmClient, LlmReply, LlmRequest};
pub use embedding::{Embedder, EmbeddingService, OllamaEmbedder};
pub use model_manager::ModelManager;
pub use ollama::{GenerateRequest, GenerateResponse, LanguageModel, LlmError, OllamaClient};
pub use sanitize::sanitize_json_response;
