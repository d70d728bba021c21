//! The process-local service container.
//!
//! Every collaborator the workflow touches is injected here at startup; no
//! module holds global state. Tests build a container over mock seam
//! implementations. Optional collaborators (feedback, conversations, graph)
//! degrade to no-ops when absent; only the retrieval engine and the model
//! runtime are required.

use std::sync::Arc;

use crate::config::Settings;
use crate::engine::RetrievalAdapter;
use crate::graph::KnowledgeGraph;
use crate::ingest::IngestionPipeline;
use crate::llm::{EmbeddingService, LlmClient};
use crate::memory::{ConversationStore, SessionMemory};
use crate::rank::{FeedbackStore, Reranker};
use crate::steps::StepBus;
use crate::types::{SearchFilters, SearchResult};

pub struct Services {
    pub settings: Settings,
    pub llm: Arc<LlmClient>,
    pub retrieval: Arc<RetrievalAdapter>,
    pub reranker: Arc<Reranker>,
    pub embeddings: Arc<EmbeddingService>,
    pub feedback: Option<Arc<FeedbackStore>>,
    pub sessions: Arc<SessionMemory>,
    pub conversations: Option<Arc<ConversationStore>>,
    pub graph: Option<Arc<KnowledgeGraph>>,
    pub steps: Arc<StepBus>,
    pub ingestion: Option<Arc<IngestionPipeline>>,
}

impl Services {
    /// The full retrieval pipeline: embed the query, hybrid-search the
    /// engine at recall depth, then rerank down to the configured result
    /// count with the user's feedback boosts applied.
    ///
    /// Never fails: an embedder outage degrades to keyword-only recall and
    /// engine outages yield an empty list.
    pub async fn execute_search(
        &self,
        query: &str,
        filters: Option<&SearchFilters>,
        user_id: Option<&str>,
        weights: Option<(f32, f32)>,
    ) -> Vec<SearchResult> {
        let recall_k = self.settings.search.recall_top_k;
        let rerank_k = self.settings.search.rerank_top_k;

        let mut candidates = match self.embeddings.encode(query).await {
            Ok(vector) => {
                self.retrieval
                    .hybrid_search_weighted(query, &vector, recall_k, filters, weights)
                    .await
            }
            Err(err) => {
                tracing::warn!(
                    target: "findry::services",
                    error = %err,
                    "query embedding failed; keyword-only recall"
                );
                self.retrieval.keyword_search(query, recall_k, filters).await
            }
        };

        // Optional recall widening through alternate phrasings.
        for variant in self.expand_query(query).await {
            for hit in self
                .retrieval
                .keyword_search(&variant, recall_k / 2, filters)
                .await
            {
                if !candidates.iter().any(|c| c.id == hit.id) {
                    candidates.push(hit);
                }
            }
        }

        if candidates.is_empty() {
            return Vec::new();
        }

        self.reranker
            .rerank(query, candidates, rerank_k, 0.0, user_id)
            .await
    }

    /// Up to three alternate phrasings of a query, used to widen recall
    /// when query expansion is enabled.
    pub async fn expand_query(&self, query: &str) -> Vec<String> {
        if !self.settings.search.query_expansion.enabled {
            return Vec::new();
        }
        let prompt = format!(
            r#"Generate up to 3 alternate search queries for: "{query}"

Each should keep the meaning but use different words. Return JSON:
{{
    "variants": ["variant 1", "variant 2"]
}}"#
        );
        let fallback = serde_json::json!({ "variants": [] });
        match self
            .llm
            .generate_json(
                crate::llm::LlmRequest::new(
                    &self.settings.ollama.text_model.name,
                    prompt,
                )
                .temperature(0.5)
                .max_retries(2)
                .timeout(self.settings.ollama.timeout()),
                Some(fallback),
            )
            .await
        {
            Ok(value) => value["variants"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .filter(|v| !v.eq_ignore_ascii_case(query))
                        .take(3)
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// The search closure handed to the corrective controller and the
    /// reasoning planner.
    pub fn search_fn(self: &Arc<Self>) -> crate::agents::SearchFn {
        let services = Arc::clone(self);
        Arc::new(move |query, filters, user_id| {
            let services = Arc::clone(&services);
            Box::pin(async move {
                services
                    .execute_search(&query, filters.as_ref(), user_id.as_deref(), None)
                    .await
            })
        })
    }
}
