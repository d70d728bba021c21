//! Per-result relevance explanations (the "Hermes" role).

use std::sync::Arc;

use serde::Serialize;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::types::SearchResult;

/// How many top results receive explanations.
pub const EXPLAINED_RESULTS: usize = 3;

#[derive(Clone, Debug, Serialize)]
pub struct ScoreComponents {
    pub semantic_share: f32,
    pub keyword_share: f32,
}

pub struct ExplanationAgent {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl ExplanationAgent {
    pub const AGENT_NAME: &'static str = "Hermes (The Messenger)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// One-sentence explanation of why a result matched, citing terms.
    pub async fn explain_ranking(
        &self,
        query: &str,
        document: &SearchResult,
        rank: usize,
    ) -> String {
        let matching = matching_terms(query, document);
        let prompt = format!(
            r#"Explain in ONE sentence why this document matches the query.

Query: "{query}"
Document: {filename} (rank {rank})
Summary excerpt: {excerpt}
Matching terms: {matching}

Answer with the single sentence only."#,
            filename = document.filename,
            excerpt = document.detailed_summary.chars().take(400).collect::<String>(),
            matching = if matching.is_empty() {
                "none".to_string()
            } else {
                matching.join(", ")
            },
        );

        let fallback = heuristic_explanation(document, &matching);
        match self
            .llm
            .generate(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
                    .max_retries(2)
                    .timeout(self.timeout)
                    .fallback(fallback.clone()),
            )
            .await
        {
            Ok(reply) => reply.text,
            Err(_) => fallback,
        }
    }
}

/// 2-3 short excerpts around query-term hits in the summary.
pub fn highlight_matches(query: &str, document: &SearchResult) -> Vec<String> {
    let summary = &document.detailed_summary;
    let summary_lower = summary.to_lowercase();
    let mut excerpts = Vec::new();

    for term in query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 2)
    {
        if excerpts.len() >= 3 {
            break;
        }
        if let Some(pos) = summary_lower.find(term) {
            let start = floor_char_boundary(summary, pos.saturating_sub(40));
            let end = floor_char_boundary(summary, (pos + term.len() + 40).min(summary.len()));
            let excerpt = summary[start..end].trim().to_string();
            if !excerpts.contains(&excerpt) {
                excerpts.push(excerpt);
            }
        }
    }
    excerpts
}

/// Decompose a hybrid score into semantic and keyword shares.
pub fn explain_score_components(document: &SearchResult) -> ScoreComponents {
    match (document.vector_score, document.bm25_score) {
        (Some(vector), Some(bm25)) => {
            let total = vector.abs() + bm25.abs();
            if total > f32::EPSILON {
                ScoreComponents {
                    semantic_share: vector.abs() / total,
                    keyword_share: bm25.abs() / total,
                }
            } else {
                ScoreComponents {
                    semantic_share: 0.5,
                    keyword_share: 0.5,
                }
            }
        }
        (Some(_), None) => ScoreComponents {
            semantic_share: 1.0,
            keyword_share: 0.0,
        },
        (None, Some(_)) => ScoreComponents {
            semantic_share: 0.0,
            keyword_share: 1.0,
        },
        (None, None) => ScoreComponents {
            semantic_share: 0.5,
            keyword_share: 0.5,
        },
    }
}

fn matching_terms(query: &str, document: &SearchResult) -> Vec<String> {
    let haystack = format!(
        "{} {} {}",
        document.detailed_summary, document.keywords, document.filename
    )
    .to_lowercase();
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 2 && haystack.contains(*t))
        .map(str::to_string)
        .collect()
}

fn heuristic_explanation(document: &SearchResult, matching: &[String]) -> String {
    if matching.is_empty() {
        format!(
            "{} is semantically related to your query.",
            document.filename
        )
    } else {
        format!(
            "{} matches your query terms: {}.",
            document.filename,
            matching.join(", ")
        )
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(summary: &str, keywords: &str) -> SearchResult {
        SearchResult {
            id: "d".into(),
            filename: "doc.pdf".into(),
            file_path: "/d/doc.pdf".into(),
            file_type: ".pdf".into(),
            document_type: "report".into(),
            is_image: false,
            detailed_summary: summary.into(),
            full_content: String::new(),
            keywords: keywords.into(),
            entities: Vec::new(),
            topics: Vec::new(),
            score: 0.8,
            raw_score: None,
            vector_score: Some(0.6),
            bm25_score: Some(0.2),
            hybrid: true,
            reranked: false,
        }
    }

    #[test]
    fn highlights_are_short_windows_around_hits() {
        let document = doc(
            "The annual budget review covers department spending and projected revenue for the next fiscal year in detail.",
            "budget",
        );
        let excerpts = highlight_matches("budget revenue", &document);
        assert!(!excerpts.is_empty());
        assert!(excerpts[0].contains("budget"));
        assert!(excerpts.len() <= 3);
        assert!(excerpts.iter().all(|e| e.len() <= 120));
    }

    #[test]
    fn score_components_sum_to_one_for_hybrid_hits() {
        let document = doc("x", "");
        let components = explain_score_components(&document);
        assert!((components.semantic_share + components.keyword_share - 1.0).abs() < 1e-6);
        assert!(components.semantic_share > components.keyword_share);
    }

    #[test]
    fn single_leg_scores_attribute_fully() {
        let mut document = doc("x", "");
        document.bm25_score = None;
        let components = explain_score_components(&document);
        assert_eq!(components.semantic_share, 1.0);
        assert_eq!(components.keyword_share, 0.0);
    }

    #[test]
    fn matching_terms_look_across_summary_keywords_and_filename() {
        let document = doc("discusses revenue", "budget, planning");
        let terms = matching_terms("budget revenue doc", &document);
        assert!(terms.contains(&"budget".to_string()));
        assert!(terms.contains(&"revenue".to_string()));
        assert!(terms.contains(&"doc".to_string()));
    }
}
