//! Fusion and degradation policy over the raw search backend.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{EngineError, SearchBackend};
use crate::config::HybridSettings;
use crate::types::{SearchFilters, SearchResult};

/// Rank constant for Reciprocal Rank Fusion.
const RRF_K: f32 = 60.0;

/// The retrieval surface the workflow talks to.
///
/// Composes vector kNN and BM25 lists with weighted RRF and degrades on
/// failure: hybrid falls back to vector-only, and when both legs fail an
/// empty list is returned. Errors never propagate into the orchestrator.
pub struct RetrievalAdapter {
    backend: Arc<dyn SearchBackend>,
    vector_weight: f32,
    bm25_weight: f32,
    hybrid_enabled: bool,
}

impl RetrievalAdapter {
    pub fn new(backend: Arc<dyn SearchBackend>, hybrid: &HybridSettings) -> Self {
        Self {
            backend,
            vector_weight: hybrid.vector_weight,
            bm25_weight: hybrid.bm25_weight,
            hybrid_enabled: hybrid.enabled,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Hybrid retrieval with per-call weight overrides (user preferences).
    pub async fn hybrid_search_weighted(
        &self,
        query: &str,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
        weights: Option<(f32, f32)>,
    ) -> Vec<SearchResult> {
        if !self.hybrid_enabled {
            return self.vector_search(vector, top_k, filters).await;
        }

        let (w_vec, w_bm25) = weights.unwrap_or((self.vector_weight, self.bm25_weight));

        let (vector_hits, bm25_hits) = tokio::join!(
            self.backend.knn_search(vector, top_k, filters),
            self.backend.bm25_search(query, top_k, filters),
        );

        match (vector_hits, bm25_hits) {
            (Ok(vector_hits), Ok(bm25_hits)) => {
                let mut fused = fuse_rrf(vector_hits, bm25_hits, w_vec, w_bm25, RRF_K);
                fused.truncate(top_k);
                fused
            }
            (Ok(vector_hits), Err(err)) => {
                tracing::error!(target: "findry::engine", error = %err, "BM25 leg failed; vector-only results");
                vector_hits
            }
            (Err(err), Ok(bm25_hits)) => {
                tracing::error!(target: "findry::engine", error = %err, "vector leg failed; BM25-only results");
                bm25_hits
            }
            (Err(vector_err), Err(bm25_err)) => {
                tracing::error!(
                    target: "findry::engine",
                    vector_error = %vector_err,
                    bm25_error = %bm25_err,
                    "both retrieval legs failed"
                );
                Vec::new()
            }
        }
    }

    pub async fn hybrid_search(
        &self,
        query: &str,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Vec<SearchResult> {
        self.hybrid_search_weighted(query, vector, top_k, filters, None)
            .await
    }

    /// Keyword-only retrieval, used when no query vector is available
    /// (for example after an embedder failure); empty on failure.
    pub async fn keyword_search(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Vec<SearchResult> {
        match self.backend.bm25_search(query, top_k, filters).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::error!(target: "findry::engine", error = %err, "keyword search failed");
                Vec::new()
            }
        }
    }

    /// Vector-only retrieval; empty on failure.
    pub async fn vector_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: Option<&SearchFilters>,
    ) -> Vec<SearchResult> {
        match self.backend.knn_search(vector, top_k, filters).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::error!(target: "findry::engine", error = %err, "vector search failed");
                Vec::new()
            }
        }
    }

    pub async fn get_document(&self, id: &str) -> Option<SearchResult> {
        match self.backend.get_document(id).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(target: "findry::engine", error = %err, id, "document fetch failed");
                None
            }
        }
    }

    pub async fn document_exists(&self, id: &str) -> Result<bool, EngineError> {
        self.backend.document_exists(id).await
    }
}

/// Weighted Reciprocal Rank Fusion of two ranked lists.
///
/// `score(d) = Σ_lists w_i / (k + rank_i(d) + 1)` with zero-based ranks; a
/// document present in only one list receives only that list's
/// contribution. Ties preserve insertion order (vector list first).
pub fn fuse_rrf(
    vector_hits: Vec<SearchResult>,
    bm25_hits: Vec<SearchResult>,
    vector_weight: f32,
    bm25_weight: f32,
    k: f32,
) -> Vec<SearchResult> {
    let mut scores: FxHashMap<String, f32> = FxHashMap::default();
    let mut docs: FxHashMap<String, SearchResult> = FxHashMap::default();
    let mut order: Vec<String> = Vec::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        let contribution = vector_weight / (k + rank as f32 + 1.0);
        let entry = scores.entry(hit.id.clone()).or_insert(0.0);
        *entry += contribution;
        docs.entry(hit.id.clone()).or_insert_with(|| {
            order.push(hit.id.clone());
            let mut doc = hit.clone();
            doc.vector_score = Some(hit.score);
            doc
        });
    }

    for (rank, hit) in bm25_hits.into_iter().enumerate() {
        let contribution = bm25_weight / (k + rank as f32 + 1.0);
        let entry = scores.entry(hit.id.clone()).or_insert(0.0);
        *entry += contribution;
        match docs.get_mut(&hit.id) {
            Some(existing) => existing.bm25_score = Some(hit.score),
            None => {
                order.push(hit.id.clone());
                let mut doc = hit.clone();
                doc.bm25_score = Some(hit.score);
                docs.insert(hit.id.clone(), doc);
            }
        }
    }

    // Stable sort keeps first-seen order for equal fused scores.
    let mut ids = order;
    ids.sort_by(|a, b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ids.into_iter()
        .filter_map(|id| {
            let mut doc = docs.remove(&id)?;
            doc.score = scores[&id];
            doc.hybrid = true;
            Some(doc)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> SearchResult {
        SearchResult {
            id: id.into(),
            filename: format!("{id}.pdf"),
            file_path: format!("/docs/{id}.pdf"),
            file_type: ".pdf".into(),
            document_type: "report".into(),
            is_image: false,
            detailed_summary: String::new(),
            full_content: String::new(),
            keywords: String::new(),
            entities: Vec::new(),
            topics: Vec::new(),
            score,
            raw_score: None,
            vector_score: None,
            bm25_score: None,
            hybrid: false,
            reranked: false,
        }
    }

    #[test]
    fn document_in_both_lists_outranks_single_list() {
        let vector = vec![hit("a", 0.9), hit("b", 0.8)];
        let bm25 = vec![hit("a", 12.0), hit("c", 10.0)];
        let fused = fuse_rrf(vector, bm25, 0.7, 0.3, 60.0);
        assert_eq!(fused[0].id, "a");
        assert!(fused[0].vector_score.is_some());
        assert!(fused[0].bm25_score.is_some());
        assert!(fused.iter().all(|r| r.hybrid));
    }

    #[test]
    fn rrf_is_monotone_in_both_lists() {
        // a outranks b in both component lists, so it must outrank b fused.
        let vector = vec![hit("a", 0.9), hit("b", 0.5)];
        let bm25 = vec![hit("a", 8.0), hit("b", 3.0)];
        let fused = fuse_rrf(vector, bm25, 0.5, 0.5, 60.0);
        let pos = |id: &str| fused.iter().position(|r| r.id == id).unwrap();
        assert!(pos("a") < pos("b"));
    }

    #[test]
    fn fused_scores_are_non_increasing_and_positive() {
        let vector = vec![hit("a", 0.9), hit("b", 0.8), hit("c", 0.7)];
        let bm25 = vec![hit("c", 5.0), hit("d", 4.0)];
        let fused = fuse_rrf(vector, bm25, 0.7, 0.3, 60.0);
        assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(fused.iter().all(|r| r.score > 0.0));
    }

    #[test]
    fn single_list_contribution_matches_formula() {
        let fused = fuse_rrf(vec![hit("only", 1.0)], vec![], 0.7, 0.3, 60.0);
        assert!((fused[0].score - 0.7 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn tie_break_preserves_insertion_order() {
        // Same ranks, same weights: equal scores; vector-list doc seen first.
        let fused = fuse_rrf(vec![hit("v", 1.0)], vec![hit("b", 1.0)], 0.5, 0.5, 60.0);
        assert_eq!(fused[0].id, "v");
        assert_eq!(fused[1].id, "b");
    }

    proptest::proptest! {
        #[test]
        fn fusion_is_sorted_and_lossless_for_arbitrary_lists(
            vector_len in 0usize..20,
            bm25_len in 0usize..20,
            overlap in 0usize..10,
        ) {
            // Shared prefix of ids appears in both lists.
            let vector: Vec<SearchResult> = (0..vector_len)
                .map(|i| if i < overlap { hit(&format!("s{i}"), 1.0) } else { hit(&format!("v{i}"), 1.0) })
                .collect();
            let bm25: Vec<SearchResult> = (0..bm25_len)
                .map(|i| if i < overlap { hit(&format!("s{i}"), 1.0) } else { hit(&format!("b{i}"), 1.0) })
                .collect();
            let shared = overlap.min(vector_len).min(bm25_len);
            let expected = vector_len + bm25_len - shared;

            let fused = fuse_rrf(vector, bm25, 0.7, 0.3, 60.0);
            proptest::prop_assert_eq!(fused.len(), expected);
            proptest::prop_assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
            proptest::prop_assert!(fused.iter().all(|r| r.score > 0.0));
        }
    }
}
