//! Hybrid retrieval over an external vector + BM25 engine.
//!
//! The engine itself (index storage, kNN, BM25 scoring) is an external
//! collaborator reached over HTTP; [`SearchBackend`] is the seam. The
//! [`RetrievalAdapter`] on top owns what the core is responsible for:
//! filter normalization, client-side Reciprocal Rank Fusion, and graceful
//! degradation (hybrid falls back to vector-only, and total failure yields
//! an empty result list rather than an error in the workflow).

pub mod adapter;
pub mod opensearch;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::{DocumentRecord, SearchFilters, SearchResult};

pub use adapter::RetrievalAdapter;
pub use opensearch::OpenSearchBackend;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("engine transport error: {0}")]
    #[diagnostic(code(findry::engine::transport))]
    Transport(String),

    #[error("engine returned HTTP {status}: {body}")]
    #[diagnostic(code(findry::engine::http_status))]
    HttpStatus { status: u16, body: String },

    #[error("failed to decode engine response: {0}")]
    #[diagnostic(code(findry::engine::decode))]
    Decode(String),

    #[error("index bootstrap failed: {0}")]
    #[diagnostic(
        code(findry::engine::bootstrap),
        help("Index creation is the only fatal startup dependency; verify the engine is reachable.")
    )]
    Bootstrap(String),
}

/// Point and search operations the engine must provide.
///
/// Implementations perform single calls with no fusion or fallback of their
/// own; ranking composition lives in [`RetrievalAdapter`].
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Create the document index if absent. kNN over the embedding field
    /// with inner-product similarity; text fields analyzed for BM25.
    async fn create_index(&self, dimension: usize) -> Result<(), EngineError>;

    async fn document_exists(&self, id: &str) -> Result<bool, EngineError>;

    /// Idempotent by id; the document is searchable immediately after.
    async fn index_document(&self, record: &DocumentRecord) -> Result<(), EngineError>;

    async fn get_document(&self, id: &str) -> Result<Option<SearchResult>, EngineError>;

    async fn delete_document(&self, id: &str) -> Result<(), EngineError>;

    /// kNN over the embedding field, scored by inner product.
    async fn knn_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, EngineError>;

    /// BM25 multi-match over summary/content/filename/keywords with
    /// fuzziness, plus a boosted phrase clause on the summary.
    async fn bm25_search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<SearchResult>, EngineError>;

    async fn count(&self) -> Result<u64, EngineError>;
}
