//! Retrieval strategy selection (the "Proteus" role).
//!
//! Scores indicator-keyword hits to pick one of five strategies, each with
//! its own parameter set (leg weights, graph hops, recency preference). An
//! LLM variant exists for genuinely ambiguous queries.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Keyword-heavy lookup for named or quoted things.
    Precise,
    /// Embedding-led search for conceptual queries.
    Semantic,
    /// Graph traversal for relatedness queries.
    Exploratory,
    /// Time-filtered search for dated or recency queries.
    Temporal,
    /// Balanced combination.
    Hybrid,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Precise => "precise",
            RetrievalStrategy::Semantic => "semantic",
            RetrievalStrategy::Exploratory => "exploratory",
            RetrievalStrategy::Temporal => "temporal",
            RetrievalStrategy::Hybrid => "hybrid",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "precise" => Some(RetrievalStrategy::Precise),
            "semantic" => Some(RetrievalStrategy::Semantic),
            "exploratory" => Some(RetrievalStrategy::Exploratory),
            "temporal" => Some(RetrievalStrategy::Temporal),
            "hybrid" => Some(RetrievalStrategy::Hybrid),
            _ => None,
        }
    }
}

/// Search parameters attached to a chosen strategy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StrategyParams {
    pub bm25_weight: f32,
    pub vector_weight: f32,
    pub graph_weight: f32,
    pub time_weight: f32,
    pub min_score: f32,
    pub expand_hops: usize,
    pub prefer_recent: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct StrategyDecision {
    pub primary: RetrievalStrategy,
    pub secondary: Option<RetrievalStrategy>,
    pub confidence: f32,
    pub reasoning: String,
}

const PRECISE_INDICATORS: [&str; 9] = [
    "exact", "specific", "called", "named", "titled", "file", "document", "pdf", "\"",
];

const TEMPORAL_INDICATORS: [&str; 14] = [
    "recent",
    "latest",
    "newest",
    "last week",
    "last month",
    "today",
    "yesterday",
    "this year",
    "2023",
    "2024",
    "2025",
    "before",
    "after",
    "during",
];

const EXPLORATORY_INDICATORS: [&str; 7] = [
    "related to",
    "connected",
    "similar",
    "like",
    "associated",
    "linked",
    "about the same",
];

pub struct AdaptiveRetriever {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl AdaptiveRetriever {
    pub const AGENT_NAME: &'static str = "Proteus (The Shape-Shifter)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Heuristic strategy classification.
    pub fn classify_strategy(&self, query: &str) -> StrategyDecision {
        classify_strategy(query)
    }

    /// LLM strategy classification for ambiguous queries; falls back to
    /// the heuristics on failure.
    pub async fn classify_strategy_llm(&self, query: &str) -> StrategyDecision {
        let prompt = format!(
            r#"Analyze this search query and determine the best retrieval strategy.

QUERY: "{query}"

STRATEGIES:
1. PRECISE: Best for queries looking for specific files/documents by name, exact terms, or keywords
2. SEMANTIC: Best for conceptual questions, understanding meaning, abstract topics
3. EXPLORATORY: Best for finding related entities, similar documents, connections
4. TEMPORAL: Best for time-sensitive queries (recent, last week, before date X)

Return JSON:
{{
    "primary_strategy": "PRECISE|SEMANTIC|EXPLORATORY|TEMPORAL",
    "secondary_strategy": "...|null",
    "confidence": 0.0-1.0,
    "reasoning": "brief explanation"
}}"#
        );

        let fallback = json!({
            "primary_strategy": "SEMANTIC",
            "secondary_strategy": null,
            "confidence": 0.5,
            "reasoning": "Default to semantic search"
        });

        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.2)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => {
                let primary = value["primary_strategy"]
                    .as_str()
                    .and_then(RetrievalStrategy::parse)
                    .unwrap_or(RetrievalStrategy::Semantic);
                let secondary = value["secondary_strategy"]
                    .as_str()
                    .and_then(RetrievalStrategy::parse);
                StrategyDecision {
                    primary,
                    secondary,
                    confidence: (value["confidence"].as_f64().unwrap_or(0.5) as f32)
                        .clamp(0.0, 1.0),
                    reasoning: value["reasoning"].as_str().unwrap_or_default().to_string(),
                }
            }
            Err(_) => classify_strategy(query),
        }
    }
}

/// Score the indicator sets and normalize into a probability; short queries
/// with no clear signal lean semantic, as do questions.
pub fn classify_strategy(query: &str) -> StrategyDecision {
    let q_lower = query.to_lowercase();

    let precise = PRECISE_INDICATORS
        .iter()
        .filter(|i| q_lower.contains(*i))
        .count() as f32;
    let temporal = TEMPORAL_INDICATORS
        .iter()
        .filter(|i| q_lower.contains(*i))
        .count() as f32;
    let exploratory = EXPLORATORY_INDICATORS
        .iter()
        .filter(|i| q_lower.contains(*i))
        .count() as f32;
    let mut semantic = 0.0_f32;

    let max_hit = precise.max(temporal).max(exploratory);
    if query.split_whitespace().count() < 4 && max_hit < 1.0 {
        semantic += 0.5;
    }
    if query.trim_end().ends_with('?') {
        semantic += 0.5;
    }

    let mut scores = [
        (RetrievalStrategy::Precise, precise),
        (RetrievalStrategy::Semantic, semantic),
        (RetrievalStrategy::Exploratory, exploratory),
        (RetrievalStrategy::Temporal, temporal),
    ];

    let total: f32 = scores.iter().map(|(_, s)| s).sum();
    if total > 0.0 {
        for (_, score) in &mut scores {
            *score /= total;
        }
    } else {
        for (_, score) in &mut scores {
            *score = 0.25;
        }
    }

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let (primary, confidence) = scores[0];
    let secondary = scores[1..]
        .iter()
        .find(|(_, s)| *s > 0.1)
        .map(|(strategy, _)| *strategy);

    let mut reasons = Vec::new();
    for (strategy, score) in &scores {
        if *score > 0.2 {
            reasons.push(match strategy {
                RetrievalStrategy::Precise => "contains specific keywords",
                RetrievalStrategy::Temporal => "has temporal constraints",
                RetrievalStrategy::Exploratory => "seeks related information",
                RetrievalStrategy::Semantic => "requires semantic understanding",
                RetrievalStrategy::Hybrid => "is mixed",
            });
        }
    }
    let reasoning = format!(
        "Query {}, using {} strategy.",
        if reasons.is_empty() {
            "is general".to_string()
        } else {
            reasons.join(", ")
        },
        primary.as_str()
    );

    let primary = if total == 0.0 {
        RetrievalStrategy::Hybrid
    } else {
        primary
    };

    StrategyDecision {
        primary,
        secondary,
        confidence: (confidence * 100.0).round() / 100.0,
        reasoning,
    }
}

/// Parameter table per strategy.
pub fn strategy_params(strategy: RetrievalStrategy) -> StrategyParams {
    match strategy {
        RetrievalStrategy::Precise => StrategyParams {
            bm25_weight: 1.0,
            vector_weight: 0.0,
            graph_weight: 0.0,
            time_weight: 0.0,
            min_score: 0.5,
            expand_hops: 0,
            prefer_recent: false,
        },
        RetrievalStrategy::Semantic => StrategyParams {
            bm25_weight: 0.3,
            vector_weight: 0.7,
            graph_weight: 0.0,
            time_weight: 0.0,
            min_score: 0.3,
            expand_hops: 0,
            prefer_recent: false,
        },
        RetrievalStrategy::Exploratory => StrategyParams {
            bm25_weight: 0.2,
            vector_weight: 0.5,
            graph_weight: 0.3,
            time_weight: 0.0,
            min_score: 0.2,
            expand_hops: 2,
            prefer_recent: false,
        },
        RetrievalStrategy::Temporal => StrategyParams {
            bm25_weight: 0.4,
            vector_weight: 0.4,
            graph_weight: 0.0,
            time_weight: 0.2,
            min_score: 0.3,
            expand_hops: 0,
            prefer_recent: true,
        },
        RetrievalStrategy::Hybrid => StrategyParams {
            bm25_weight: 0.5,
            vector_weight: 0.5,
            graph_weight: 0.0,
            time_weight: 0.0,
            min_score: 0.3,
            expand_hops: 0,
            prefer_recent: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_named_queries_classify_precise() {
        let decision = classify_strategy("the file called \"q3-budget.pdf\"");
        assert_eq!(decision.primary, RetrievalStrategy::Precise);
        assert!(decision.confidence > 0.0);
    }

    #[test]
    fn recency_queries_classify_temporal() {
        let decision = classify_strategy("latest invoices from last week");
        assert_eq!(decision.primary, RetrievalStrategy::Temporal);
        assert!(strategy_params(decision.primary).prefer_recent);
    }

    #[test]
    fn relatedness_queries_classify_exploratory() {
        let decision = classify_strategy("anything related to the Harbor project partners");
        assert_eq!(decision.primary, RetrievalStrategy::Exploratory);
        assert_eq!(strategy_params(decision.primary).expand_hops, 2);
    }

    #[test]
    fn short_vague_queries_lean_semantic() {
        let decision = classify_strategy("happiness notes");
        assert_eq!(decision.primary, RetrievalStrategy::Semantic);
    }

    #[test]
    fn indicator_free_queries_fall_back_to_hybrid() {
        let decision = classify_strategy("quarterly departmental spending breakdown overview");
        assert_eq!(decision.primary, RetrievalStrategy::Hybrid);
        assert!((decision.confidence - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn confidence_is_a_probability() {
        for query in ["find \"exact file\"", "recent stuff", "notes?"] {
            let decision = classify_strategy(query);
            assert!(decision.confidence >= 0.0 && decision.confidence <= 1.0);
        }
    }
}
