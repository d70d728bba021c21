//! Result-quality evaluation and hallucination checks (the "Diogenes"
//! role).

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::types::SearchResult;

#[derive(Clone, Debug, Serialize)]
pub struct QualityEvaluation {
    pub quality_score: f32,
    pub relevance: f32,
    pub completeness: f32,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub should_reformulate: bool,
}

impl QualityEvaluation {
    fn empty_results() -> Self {
        Self {
            quality_score: 0.0,
            relevance: 0.0,
            completeness: 0.0,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            recommendations: vec!["No results found. Try broadening your search terms.".into()],
            should_reformulate: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HallucinationReport {
    pub has_hallucination: bool,
    pub confidence: f32,
    pub unsupported_claims: Vec<String>,
    pub supported_claims: Vec<String>,
}

pub struct CriticAgent {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl CriticAgent {
    pub const AGENT_NAME: &'static str = "Diogenes (The Critic)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Evaluate how well a result set answers a query.
    pub async fn evaluate_results(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> QualityEvaluation {
        if results.is_empty() {
            return QualityEvaluation::empty_results();
        }

        let listing: Vec<String> = results
            .iter()
            .take(5)
            .enumerate()
            .map(|(i, r)| format!("{}. {} (score: {:.2})", i + 1, r.filename, r.score))
            .collect();

        let prompt = format!(
            r#"Evaluate these search results for query: "{query}"

Results:
{listing}

Return JSON:
{{
    "quality_score": 0.0-1.0,
    "relevance_score": 0.0-1.0,
    "completeness_score": 0.0-1.0,
    "strengths": ["strength1"],
    "weaknesses": ["weakness1"],
    "recommendations": ["rec1"],
    "should_reformulate": true/false
}}

IMPORTANT: Return ONLY the raw JSON. Do not use markdown code blocks."#,
            listing = listing.join("\n")
        );

        let fallback = json!({
            "quality_score": 0.7,
            "relevance_score": 0.7,
            "completeness_score": 0.6,
            "strengths": [],
            "weaknesses": [],
            "recommendations": [],
            "should_reformulate": false
        });

        let value = self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.2)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
            .unwrap_or_else(|_| json!({}));

        QualityEvaluation {
            quality_score: clamp01(value["quality_score"].as_f64().unwrap_or(0.5)),
            relevance: clamp01(value["relevance_score"].as_f64().unwrap_or(0.5)),
            completeness: clamp01(value["completeness_score"].as_f64().unwrap_or(0.5)),
            strengths: string_list(&value["strengths"]),
            weaknesses: string_list(&value["weaknesses"]),
            recommendations: string_list(&value["recommendations"]),
            should_reformulate: value["should_reformulate"].as_bool().unwrap_or(false),
        }
    }

    /// Check a generated answer against its source summaries.
    pub async fn detect_hallucination(
        &self,
        query: &str,
        answer: &str,
        sources: &[SearchResult],
    ) -> HallucinationReport {
        let source_summaries: Vec<String> = sources
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "{}. {}",
                    i + 1,
                    s.detailed_summary.chars().take(200).collect::<String>()
                )
            })
            .collect();

        let prompt = format!(
            r#"Check for hallucinations in this response:
Query: "{query}"
Response: "{answer}"
Sources:
{sources}

Return JSON:
{{
    "has_hallucination": true/false,
    "confidence": 0.0-1.0,
    "unsupported_claims": [],
    "supported_claims": []
}}"#,
            sources = source_summaries.join("\n")
        );

        let fallback = json!({
            "has_hallucination": false,
            "confidence": 0.5,
            "unsupported_claims": [],
            "supported_claims": []
        });

        let value = self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.1)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
            .unwrap_or_else(|_| json!({}));

        HallucinationReport {
            has_hallucination: value["has_hallucination"].as_bool().unwrap_or(false),
            confidence: clamp01(value["confidence"].as_f64().unwrap_or(0.5)),
            unsupported_claims: string_list(&value["unsupported_claims"]),
            supported_claims: string_list(&value["supported_claims"]),
        }
    }

    /// Overall confidence from result count, critic quality, and top score.
    pub fn calculate_confidence(
        &self,
        results: &[SearchResult],
        evaluation: &QualityEvaluation,
    ) -> f32 {
        if results.is_empty() {
            return 0.0;
        }
        let count_score = (results.len() as f32 / 5.0).min(1.0);
        let top_score = results.first().map(|r| r.score.min(1.0)).unwrap_or(0.0);
        let confidence = count_score * 0.2 + evaluation.quality_score * 0.4 + top_score * 0.4;
        (confidence * 100.0).round() / 100.0
    }

    /// Up to five user-facing suggestions derived from the evaluation.
    pub fn suggest_improvements(
        &self,
        results: &[SearchResult],
        evaluation: &QualityEvaluation,
    ) -> Vec<String> {
        let mut suggestions = Vec::new();
        if evaluation.should_reformulate {
            suggestions.push("Try rephrasing your query with different keywords".to_string());
        }
        if evaluation.relevance < 0.5 {
            suggestions.push("Results may not match your intent. Be more specific".to_string());
        }
        if results.is_empty() {
            suggestions.extend([
                "Try broader search terms".to_string(),
                "Check if documents are indexed".to_string(),
                "Use different keywords".to_string(),
            ]);
        } else if results.len() < 3 {
            suggestions.push("Limited results found. Try expanding your search".to_string());
        }
        suggestions.extend(evaluation.recommendations.iter().cloned());
        suggestions.truncate(5);
        suggestions
    }
}

/// Heuristic quality scoring used when no model is reachable: result
/// count, average score, and query-term coverage.
pub fn heuristic_quality(query: &str, results: &[SearchResult]) -> (f32, Vec<String>) {
    if results.is_empty() {
        return (0.0, vec!["No results found".to_string()]);
    }

    let mut quality = 0.3_f32;
    let mut issues = Vec::new();

    if results.len() >= 5 {
        quality += 0.2;
    } else if results.len() >= 2 {
        quality += 0.1;
    } else {
        issues.push("Too few results".to_string());
    }

    let scores: Vec<f32> = results.iter().map(|r| r.score).filter(|s| *s > 0.0).collect();
    if !scores.is_empty() {
        let avg = scores.iter().sum::<f32>() / scores.len() as f32;
        if avg >= 0.7 {
            quality += 0.3;
        } else if avg >= 0.5 {
            quality += 0.15;
        } else {
            issues.push("Low relevance scores".to_string());
        }
    }

    let query_terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let matches = results
        .iter()
        .take(5)
        .filter(|r| {
            let content = format!("{} {}", r.detailed_summary, r.filename).to_lowercase();
            query_terms.iter().any(|t| content.contains(t))
        })
        .count();
    if matches >= 3 {
        quality += 0.2;
    } else if matches >= 1 {
        quality += 0.1;
    } else {
        issues.push("Query terms not well matched".to_string());
    }

    (quality.min(1.0), issues)
}

fn clamp01(value: f64) -> f32 {
    (value as f32).clamp(0.0, 1.0)
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
