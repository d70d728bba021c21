//! Cross-encoder reranking with sigmoid normalization, feedback boosts,
//! and optional diversity-aware selection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::RankError;
use super::feedback::FeedbackStore;
use crate::config::CrossEncoderSettings;
use crate::types::SearchResult;

/// Maximum share of the normalized score a feedback boost may move.
const BOOST_CAP: f32 = 0.2;

/// Pairwise relevance scorer seam.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Raw (unbounded) relevance scores, one per `(query, document)` pair,
    /// in input order.
    async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RankError>;
}

/// HTTP cross-encoder against a scoring sidecar exposing `POST /score`.
pub struct HttpCrossEncoder {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ScoreBody<'a> {
    model: &'a str,
    pairs: &'a [(String, String)],
}

#[derive(Deserialize)]
struct ScoreReply {
    scores: Vec<f32>,
}

impl HttpCrossEncoder {
    pub fn new(settings: &CrossEncoderSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.clone(),
            model: settings.name.clone(),
        }
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RankError> {
        let response = self
            .http
            .post(format!("{}/score", self.base_url))
            .json(&ScoreBody {
                model: &self.model,
                pairs,
            })
            .send()
            .await
            .map_err(|err| RankError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RankError::HttpStatus {
                status: status.as_u16(),
            });
        }
        let reply: ScoreReply = response
            .json()
            .await
            .map_err(|err| RankError::Transport(err.to_string()))?;
        if reply.scores.len() != pairs.len() {
            return Err(RankError::ScoreCount {
                got: reply.scores.len(),
                expected: pairs.len(),
            });
        }
        Ok(reply.scores)
    }
}

/// Why a document ranked where it did.
#[derive(Clone, Debug, Serialize)]
pub struct RankingExplanation {
    pub score: f32,
    pub normalized_score: f32,
    pub matching_terms: Vec<String>,
    pub relevant_keywords: Vec<String>,
    pub explanation: String,
}

pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    feedback: Option<Arc<FeedbackStore>>,
    max_length: usize,
}

impl Reranker {
    pub fn new(
        encoder: Arc<dyn CrossEncoder>,
        feedback: Option<Arc<FeedbackStore>>,
        settings: &CrossEncoderSettings,
    ) -> Self {
        Self {
            encoder,
            feedback,
            max_length: settings.max_length,
        }
    }

    /// Rerank candidates for a query.
    ///
    /// Scores every candidate with the cross-encoder, normalizes through a
    /// sigmoid into [0, 1], applies the caller's per-user feedback boosts
    /// (capped at ±0.2 and clamped back into range), then selects `top_k`:
    /// by plain descending score when `diversity_weight == 0`, otherwise by
    /// MMR trading relevance against keyword overlap with already-selected
    /// results.
    ///
    /// On encoder failure the input candidates are returned truncated to
    /// `top_k`, unscored — ranking degrades, the workflow continues.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchResult>,
        top_k: usize,
        diversity_weight: f32,
        user_id: Option<&str>,
    ) -> Vec<SearchResult> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|doc| (query.to_string(), self.pair_text(doc)))
            .collect();

        let raw_scores = match self.encoder.predict(&pairs).await {
            Ok(scores) => scores,
            Err(err) => {
                tracing::error!(target: "findry::rank", error = %err, "cross-encoder failed; keeping retrieval order");
                let mut passthrough = candidates;
                passthrough.truncate(top_k);
                return passthrough;
            }
        };

        let mut normalized: Vec<f32> = raw_scores.iter().map(|s| sigmoid(*s)).collect();

        if let (Some(user_id), Some(feedback)) = (user_id, &self.feedback) {
            let ids: Vec<String> = candidates.iter().map(|d| d.id.clone()).collect();
            match feedback.get_boosts(user_id, query, &ids).await {
                Ok(boosts) => {
                    for (i, doc) in candidates.iter().enumerate() {
                        if let Some(boost) = boosts.get(&doc.id) {
                            let adjustment = boost * BOOST_CAP;
                            if adjustment != 0.0 {
                                normalized[i] = (normalized[i] + adjustment).clamp(0.0, 1.0);
                                tracing::debug!(
                                    target: "findry::rank",
                                    document_id = %doc.id,
                                    adjustment,
                                    "applied feedback boost"
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "findry::rank", error = %err, "feedback boosts unavailable");
                }
            }
        }

        let selected = if diversity_weight > 0.0 {
            mmr_select(&normalized, &candidates, top_k, diversity_weight)
        } else {
            let mut order: Vec<usize> = (0..candidates.len()).collect();
            order.sort_by(|&a, &b| {
                normalized[b]
                    .partial_cmp(&normalized[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            order.truncate(top_k);
            order
        };

        let reranked: Vec<SearchResult> = selected
            .into_iter()
            .map(|idx| {
                let mut doc = candidates[idx].clone();
                doc.raw_score = Some(raw_scores[idx]);
                doc.score = normalized[idx];
                doc.reranked = true;
                doc
            })
            .collect();

        tracing::info!(
            target: "findry::rank",
            candidates = candidates.len(),
            returned = reranked.len(),
            "reranked documents"
        );
        reranked
    }

    /// Decompose one document's ranking into human-readable parts.
    pub async fn explain_ranking(
        &self,
        query: &str,
        document: &SearchResult,
    ) -> Result<RankingExplanation, RankError> {
        let text = self.pair_text(document);
        let scores = self
            .encoder
            .predict(&[(query.to_string(), text.clone())])
            .await?;
        let score = scores.first().copied().unwrap_or(0.0);

        let query_terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let doc_terms: std::collections::HashSet<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let matching_terms: Vec<String> = query_terms
            .iter()
            .filter(|t| doc_terms.contains(*t))
            .cloned()
            .collect();

        let relevant_keywords: Vec<String> = document
            .keywords
            .split(',')
            .map(str::trim)
            .filter(|kw| {
                let kw_lower = kw.to_lowercase();
                query_terms.iter().any(|qt| kw_lower.contains(qt))
            })
            .map(str::to_string)
            .collect();

        let relevance = if score > 5.0 {
            "highly relevant"
        } else if score > 2.0 {
            "moderately relevant"
        } else if score > 0.0 {
            "somewhat relevant"
        } else {
            "marginally relevant"
        };
        let mut explanation = format!("This document is {relevance} to your query");
        if !matching_terms.is_empty() {
            explanation.push_str(&format!(
                " (matches: {})",
                matching_terms
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !relevant_keywords.is_empty() {
            explanation.push_str(&format!(
                " with related topics: {}",
                relevant_keywords
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        explanation.push('.');

        Ok(RankingExplanation {
            score,
            normalized_score: sigmoid(score),
            matching_terms,
            relevant_keywords,
            explanation,
        })
    }

    /// The text scored against the query: summary plus keywords, truncated
    /// to a rough character budget derived from the model's max length.
    fn pair_text(&self, doc: &SearchResult) -> String {
        let mut text = doc.detailed_summary.clone();
        if !doc.keywords.is_empty() {
            text.push_str("\nKeywords: ");
            text.push_str(&doc.keywords);
        }
        let budget = self.max_length * 4;
        if text.len() > budget {
            let mut cut = budget;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        text
    }
}

pub fn sigmoid(score: f32) -> f32 {
    1.0 / (1.0 + (-score).exp())
}

/// Maximal Marginal Relevance selection: greedily pick the candidate
/// maximizing `score - diversity_weight * max_similarity_to_selected`,
/// where similarity is keyword Jaccard.
fn mmr_select(
    scores: &[f32],
    documents: &[SearchResult],
    top_k: usize,
    diversity_weight: f32,
) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..documents.len()).collect();

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (pos, &idx) in remaining.iter().enumerate() {
            let penalty = selected
                .iter()
                .map(|&s| keyword_jaccard(&documents[idx], &documents[s]))
                .fold(0.0_f32, f32::max)
                * diversity_weight;
            let mmr = scores[idx] - penalty;
            if best.is_none_or(|(_, b)| mmr > b) {
                best = Some((pos, mmr));
            }
        }
        let (pos, _) = best.expect("remaining is non-empty");
        selected.push(remaining.remove(pos));
    }
    selected
}

fn keyword_jaccard(a: &SearchResult, b: &SearchResult) -> f32 {
    let set = |doc: &SearchResult| -> std::collections::HashSet<String> {
        doc.keywords
            .to_lowercase()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    };
    let ka = set(a);
    let kb = set(b);
    if ka.is_empty() || kb.is_empty() {
        return 0.0;
    }
    let intersection = ka.intersection(&kb).count() as f32;
    let union = ka.union(&kb).count() as f32;
    if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrossEncoderSettings;

    struct FixedEncoder(Vec<f32>);

    #[async_trait]
    impl CrossEncoder for FixedEncoder {
        async fn predict(&self, pairs: &[(String, String)]) -> Result<Vec<f32>, RankError> {
            Ok(self.0.iter().copied().take(pairs.len()).collect())
        }
    }

    fn doc(id: &str, keywords: &str) -> SearchResult {
        SearchResult {
            id: id.into(),
            filename: format!("{id}.pdf"),
            file_path: format!("/d/{id}.pdf"),
            file_type: ".pdf".into(),
            document_type: "report".into(),
            is_image: false,
            detailed_summary: format!("summary of {id}"),
            full_content: String::new(),
            keywords: keywords.into(),
            entities: Vec::new(),
            topics: Vec::new(),
            score: 0.5,
            raw_score: None,
            vector_score: None,
            bm25_score: None,
            hybrid: true,
            reranked: false,
        }
    }

    fn reranker(scores: Vec<f32>) -> Reranker {
        Reranker::new(
            Arc::new(FixedEncoder(scores)),
            None,
            &CrossEncoderSettings::default(),
        )
    }

    #[test]
    fn sigmoid_is_bounded_and_monotone() {
        assert!(sigmoid(-100.0) < 0.01);
        assert!(sigmoid(100.0) > 0.99);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(1.0) > sigmoid(0.5));
    }

    #[tokio::test]
    async fn sorts_by_normalized_score_without_diversity() {
        let candidates = vec![doc("a", ""), doc("b", ""), doc("c", "")];
        let ranked = reranker(vec![0.1, 3.0, 1.0])
            .rerank("q", candidates, 3, 0.0, None)
            .await;
        let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert!(ranked.iter().all(|d| d.reranked));
        assert!(ranked.iter().all(|d| d.score >= 0.0 && d.score <= 1.0));
        assert_eq!(ranked[0].raw_score, Some(3.0));
    }

    #[tokio::test]
    async fn rerank_is_idempotent_on_order() {
        let candidates = vec![doc("a", ""), doc("b", ""), doc("c", "")];
        let first = reranker(vec![0.2, 2.0, 1.0])
            .rerank("q", candidates, 3, 0.0, None)
            .await;
        // Scores must be re-derived per input position, so feed the encoder
        // scores permuted to match the new input order.
        let second = reranker(vec![2.0, 1.0, 0.2])
            .rerank("q", first.clone(), 3, 0.0, None)
            .await;
        let order =
            |v: &[SearchResult]| v.iter().map(|d| d.id.clone()).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
    }

    #[tokio::test]
    async fn mmr_penalizes_redundant_keywords() {
        // "a" and "b" share all keywords; "c" is distinct but lower scored.
        let candidates = vec![
            doc("a", "budget, finance"),
            doc("b", "budget, finance"),
            doc("c", "travel, photos"),
        ];
        let ranked = reranker(vec![3.0, 2.9, 1.0])
            .rerank("q", candidates, 2, 0.9, None)
            .await;
        let ids: Vec<&str> = ranked.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[tokio::test]
    async fn truncates_to_top_k() {
        let candidates = vec![doc("a", ""), doc("b", ""), doc("c", "")];
        let ranked = reranker(vec![1.0, 2.0, 3.0])
            .rerank("q", candidates, 2, 0.0, None)
            .await;
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn encoder_failure_keeps_retrieval_order() {
        struct FailingEncoder;
        #[async_trait]
        impl CrossEncoder for FailingEncoder {
            async fn predict(&self, _: &[(String, String)]) -> Result<Vec<f32>, RankError> {
                Err(RankError::HttpStatus { status: 503 })
            }
        }
        let reranker = Reranker::new(
            Arc::new(FailingEncoder),
            None,
            &CrossEncoderSettings::default(),
        );
        let ranked = reranker
            .rerank("q", vec![doc("a", ""), doc("b", "")], 1, 0.0, None)
            .await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, "a");
        assert!(!ranked[0].reranked);
    }

    #[tokio::test]
    async fn explain_ranking_reports_matches() {
        let reranker = reranker(vec![2.5]);
        let document = doc("a", "budget planning, travel");
        let explanation = reranker
            .explain_ranking("budget summary", &document)
            .await
            .unwrap();
        assert!(explanation.explanation.contains("moderately relevant"));
        assert!(
            explanation
                .relevant_keywords
                .iter()
                .any(|k| k.contains("budget"))
        );
    }
}
