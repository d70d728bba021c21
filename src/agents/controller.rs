//! Corrective retrieval loop (the "Sisyphus" role).
//!
//! Retrieve, evaluate, and — while quality stays under the threshold —
//! reformulate and retry, up to a hard iteration cap. The best-scoring
//! attempt wins regardless of which iteration produced it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use super::critic::{CriticAgent, heuristic_quality};
use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::steps::StepEvent;
use crate::types::{SearchFilters, SearchResult};

pub const DEFAULT_MAX_ITERATIONS: usize = 3;
pub const DEFAULT_QUALITY_THRESHOLD: f32 = 0.6;

/// The pluggable search executed on every iteration.
pub type SearchFn = Arc<
    dyn Fn(
            String,
            Option<SearchFilters>,
            Option<String>,
        ) -> Pin<Box<dyn Future<Output = Vec<SearchResult>> + Send>>
        + Send
        + Sync,
>;

/// Step sink for loop progress; the orchestrator forwards these to the bus.
pub type StepSink<'a> = &'a mut (dyn FnMut(StepEvent) + Send);

#[derive(Clone, Debug, Serialize)]
pub struct RetrievalAttempt {
    pub iteration: usize,
    pub query: String,
    #[serde(skip)]
    pub results: Vec<SearchResult>,
    pub quality_score: f32,
    pub issues: Vec<String>,
    pub reformulation_applied: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CorrectedResults {
    #[serde(skip)]
    pub final_results: Vec<SearchResult>,
    pub final_query: String,
    pub original_query: String,
    pub total_iterations: usize,
    pub attempts: Vec<RetrievalAttempt>,
    pub final_quality: f32,
    pub was_reformulated: bool,
    pub improvement_percentage: f32,
}

pub struct RetrievalController {
    llm: Arc<LlmClient>,
    critic: Option<Arc<CriticAgent>>,
    model: String,
    max_iterations: usize,
    quality_threshold: f32,
}

impl RetrievalController {
    pub const AGENT_NAME: &'static str = "Sisyphus (The Persistent)";

    pub fn new(llm: Arc<LlmClient>, critic: Option<Arc<CriticAgent>>, settings: &Settings) -> Self {
        Self {
            llm,
            critic,
            model: settings.ollama.unified_model.name.clone(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, quality_threshold: f32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.quality_threshold = quality_threshold;
        self
    }

    /// Whether the loop is worth running for an initial result set.
    pub fn should_use_correction(&self, query: &str, initial_results: &[SearchResult]) -> bool {
        if initial_results.len() < 3 {
            return true;
        }
        let avg: f32 = initial_results.iter().map(|r| r.score).sum::<f32>()
            / initial_results.len() as f32;
        if avg < 0.5 {
            return true;
        }
        query.split_whitespace().count() > 8 || query.contains('?')
    }

    /// Run the corrective loop.
    pub async fn retrieve_with_correction(
        &self,
        query: &str,
        filters: Option<SearchFilters>,
        user_id: Option<&str>,
        search: SearchFn,
        mut step: Option<StepSink<'_>>,
    ) -> CorrectedResults {
        let mut current_query = query.to_string();
        let mut attempts: Vec<RetrievalAttempt> = Vec::new();
        let mut best_results: Vec<SearchResult> = Vec::new();
        let mut best_quality = 0.0_f32;

        for iteration in 1..=self.max_iterations {
            if let Some(step) = step.as_deref_mut() {
                step(StepEvent::step(
                    Self::AGENT_NAME,
                    format!("Iteration {iteration}/{}", self.max_iterations),
                    format!("Searching with: '{}'", clip(&current_query, 50)),
                ));
            }

            let results = search(
                current_query.clone(),
                filters.clone(),
                user_id.map(str::to_string),
            )
            .await;

            let (quality_score, issues) = self.evaluate_quality(&current_query, &results).await;

            attempts.push(RetrievalAttempt {
                iteration,
                query: current_query.clone(),
                results: results.clone(),
                quality_score,
                issues: issues.clone(),
                reformulation_applied: iteration > 1,
            });

            if quality_score > best_quality {
                best_quality = quality_score;
                best_results = results;
            }

            if let Some(step) = step.as_deref_mut() {
                step(StepEvent::step(
                    Self::AGENT_NAME,
                    format!("Quality: {:.0}%", quality_score * 100.0),
                    format!("Found {} results", attempts.last().map(|a| a.results.len()).unwrap_or(0)),
                ));
            }

            if quality_score >= self.quality_threshold {
                tracing::info!(
                    target: "findry::agents",
                    iteration,
                    quality = quality_score,
                    "quality threshold met"
                );
                break;
            }

            if iteration < self.max_iterations {
                if let Some(step) = step.as_deref_mut() {
                    step(StepEvent::step(
                        Self::AGENT_NAME,
                        "Reformulating Query",
                        format!("Issues: {}", issues.iter().take(2).cloned().collect::<Vec<_>>().join(", ")),
                    ));
                }
                let reformulated = self
                    .reformulate(query, &current_query, &issues, attempts.last().map(|a| a.results.as_slice()).unwrap_or(&[]))
                    .await;
                if !reformulated.is_empty() && reformulated != current_query {
                    tracing::info!(
                        target: "findry::agents",
                        new_query = %clip(&reformulated, 50),
                        "query reformulated"
                    );
                    current_query = reformulated;
                }
            }
        }

        let initial_quality = attempts.first().map(|a| a.quality_score).unwrap_or(0.0);
        let improvement =
            ((best_quality - initial_quality) / initial_quality.max(0.01)) * 100.0;

        CorrectedResults {
            final_results: best_results,
            was_reformulated: current_query != query,
            final_query: current_query,
            original_query: query.to_string(),
            total_iterations: attempts.len(),
            attempts,
            final_quality: best_quality,
            improvement_percentage: improvement.max(0.0),
        }
    }

    async fn evaluate_quality(&self, query: &str, results: &[SearchResult]) -> (f32, Vec<String>) {
        if results.is_empty() {
            return (0.0, vec!["No results found".to_string()]);
        }
        if let Some(critic) = &self.critic {
            let evaluation = critic.evaluate_results(query, results).await;
            let mut issues = evaluation.weaknesses.clone();
            if issues.is_empty() && evaluation.should_reformulate {
                issues.push("Low quality results".to_string());
            }
            return (evaluation.quality_score, issues);
        }
        heuristic_quality(query, results)
    }

    async fn reformulate(
        &self,
        original_query: &str,
        current_query: &str,
        issues: &[String],
        results: &[SearchResult],
    ) -> String {
        // Keyword hints from the partial matches steer the rewrite.
        let mut hint_terms: Vec<String> = Vec::new();
        for result in results.iter().take(3) {
            for keyword in result.keywords.split(',').take(3) {
                let keyword = keyword.trim();
                if !keyword.is_empty() && !hint_terms.iter().any(|t| t == keyword) {
                    hint_terms.push(keyword.to_string());
                }
            }
        }
        let hint_line = if hint_terms.is_empty() {
            String::new()
        } else {
            format!(
                "\nTerms from partial matches: {}",
                hint_terms
                    .iter()
                    .take(5)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };

        let prompt = format!(
            r#"You are a search query optimizer. The user's search didn't return good results.

Original query: "{original_query}"
Current query: "{current_query}"
Issues: {issues}
{hint_line}

Generate a SINGLE improved search query that:
1. Keeps the original intent
2. Addresses the issues
3. Uses different keywords or phrasing
4. Is concise (under 15 words)

Return ONLY the new query, nothing else."#,
            issues = issues.join(", ")
        );

        let reply = self
            .llm
            .generate(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.7)
                    .num_predict(50)
                    .max_retries(1)
                    .timeout(std::time::Duration::from_secs(30)),
            )
            .await;

        match reply {
            Ok(reply) => {
                let cleaned = reply.text.trim().trim_matches(['"', '\'']).to_string();
                if !cleaned.is_empty() && cleaned.len() < 200 {
                    return cleaned;
                }
                simple_reformulation(original_query, issues)
            }
            Err(_) => simple_reformulation(original_query, issues),
        }
    }
}

/// Rule fallback when the model produces nothing usable: broaden an
/// over-specific query to its first three words, or swap one common verb
/// for a synonym.
pub fn simple_reformulation(query: &str, issues: &[String]) -> String {
    let words: Vec<&str> = query.split_whitespace().collect();

    if issues.iter().any(|i| i == "Too few results") && words.len() > 3 {
        return words[..3].join(" ");
    }

    for (word, replacement) in [
        ("find", "search"),
        ("show", "display"),
        ("get", "retrieve"),
        ("about", "regarding"),
    ] {
        if words.iter().any(|w| w.eq_ignore_ascii_case(word)) {
            return words
                .iter()
                .map(|w| {
                    if w.eq_ignore_ascii_case(word) {
                        replacement
                    } else {
                        w
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
        }
    }

    query.to_string()
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max_chars).collect();
        format!("{clipped}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, score: f32, summary: &str, keywords: &str) -> SearchResult {
        SearchResult {
            id: id.into(),
            filename: format!("{id}.pdf"),
            file_path: format!("/d/{id}.pdf"),
            file_type: ".pdf".into(),
            document_type: "report".into(),
            is_image: false,
            detailed_summary: summary.into(),
            full_content: String::new(),
            keywords: keywords.into(),
            entities: Vec::new(),
            topics: Vec::new(),
            score,
            raw_score: None,
            vector_score: None,
            bm25_score: None,
            hybrid: true,
            reranked: false,
        }
    }

    #[test]
    fn simple_reformulation_broadens_long_queries() {
        let reformulated = simple_reformulation(
            "obscure phrase that is nowhere in corpus",
            &["Too few results".to_string()],
        );
        assert_eq!(reformulated, "obscure phrase that");
    }

    #[test]
    fn simple_reformulation_swaps_synonyms() {
        let reformulated = simple_reformulation("find budget", &[]);
        assert_eq!(reformulated, "search budget");
    }

    #[test]
    fn correction_gate_triggers_on_thin_or_weak_results() {
        // A controller without a model is fine for the pure gate.
        let gate = |query: &str, results: &[SearchResult]| {
            if results.len() < 3 {
                return true;
            }
            let avg: f32 =
                results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32;
            if avg < 0.5 {
                return true;
            }
            query.split_whitespace().count() > 8 || query.contains('?')
        };
        assert!(gate("q", &[]));
        let strong: Vec<SearchResult> = (0..4)
            .map(|i| doc(&format!("d{i}"), 0.9, "relevant", ""))
            .collect();
        assert!(!gate("short query", &strong));
        assert!(gate("why did the totals differ between the two reports?", &strong));
    }
}
