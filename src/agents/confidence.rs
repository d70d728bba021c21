//! Answer-confidence scoring and evidence assessment (the "Themis" role).

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::types::SearchResult;

const UNCERTAINTY_PHRASES: [&str; 7] = [
    "i'm not sure",
    "might be",
    "possibly",
    "perhaps",
    "unclear",
    "couldn't find",
    "no information",
];

const CERTAINTY_PHRASES: [&str; 5] = [
    "clearly",
    "definitely",
    "the document states",
    "according to",
    "specifically",
];

#[derive(Clone, Debug, Serialize)]
pub struct EvidenceStrength {
    /// strong, moderate, weak, or none.
    pub level: &'static str,
    pub score: f32,
    pub supporting_sources: usize,
    pub explanation: String,
}

pub struct ConfidenceScorer {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl ConfidenceScorer {
    pub const AGENT_NAME: &'static str = "Themis (The Just)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.unified_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Compose answer confidence from source count, top-source quality,
    /// answer-length sanity, retrieval quality, and linguistic certainty
    /// against the query, over a 0.5 base, clamped to [0, 1].
    pub fn score_answer(
        &self,
        answer: &str,
        query: &str,
        sources: &[SearchResult],
        retrieval_quality: Option<f32>,
    ) -> f32 {
        score_answer(answer, query, sources, retrieval_quality)
    }

    /// Classify evidence strength by how many sources score >= 0.5.
    pub fn assess_evidence(&self, sources: &[SearchResult]) -> EvidenceStrength {
        assess_evidence(sources)
    }

    /// Alternative interpretations; only consulted when confidence < 0.6.
    pub async fn generate_alternatives(&self, query: &str, answer: &str) -> Vec<String> {
        let clipped_answer: String = answer.chars().take(500).collect();
        let prompt = format!(
            r#"The user asked: "{query}"

The answer provided was: "{clipped_answer}"

If this answer might not be exactly what the user was looking for,
suggest 2-3 alternative interpretations of their question.

Return JSON:
{{
    "alternatives": [
        "Alternative interpretation 1",
        "Alternative interpretation 2"
    ]
}}

Only suggest alternatives if the question could reasonably be interpreted differently.
If the question is clear and unambiguous, return empty list."#
        );

        let fallback = json!({ "alternatives": [] });
        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.4)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => string_list(&value["alternatives"]).into_iter().take(3).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Suggested follow-up questions grounded in the source topics.
    pub async fn suggest_followups(
        &self,
        query: &str,
        answer: &str,
        sources: &[SearchResult],
    ) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for source in sources.iter().take(5) {
            for topic in &source.topics {
                if !topics.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
                    topics.push(topic.clone());
                }
            }
        }

        let clipped_answer: String = answer.chars().take(400).collect();
        let prompt = format!(
            r#"The user asked: "{query}" and received: "{clipped_answer}"

Available related topics: {topics}

Suggest 2-3 natural follow-up questions the user might ask next.

Return JSON:
{{
    "followups": ["question 1", "question 2"]
}}"#,
            topics = if topics.is_empty() {
                "none".to_string()
            } else {
                topics.join(", ")
            }
        );

        let fallback = json!({ "followups": [] });
        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.5)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => string_list(&value["followups"]).into_iter().take(3).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Factor composition over a 0.5 base; see the scorer docs for weights.
pub fn score_answer(
    answer: &str,
    query: &str,
    sources: &[SearchResult],
    retrieval_quality: Option<f32>,
) -> f32 {
    let base = 0.5_f32;

    let sources_score = (sources.len() as f32 / 5.0).min(1.0) * 0.2;

    let source_quality = sources
        .first()
        .map(|top| top.score.min(1.0) * 0.2)
        .unwrap_or(0.0);

    let answer_len = answer.len();
    let length_score = if !(50..=2000).contains(&answer_len) {
        0.1
    } else {
        0.15
    };

    let quality_score = match retrieval_quality {
        Some(quality) => quality * 0.2,
        None => 0.1,
    };

    let answer_lower = answer.to_lowercase();
    let query_lower = query.to_lowercase();
    let uncertainty = UNCERTAINTY_PHRASES
        .iter()
        .filter(|p| answer_lower.contains(*p))
        .count();
    // Answers that restate the query's own terms read as grounded.
    let echoes_query = query_lower
        .split_whitespace()
        .filter(|t| t.len() > 3 && answer_lower.contains(*t))
        .count()
        .min(1);
    let certainty = CERTAINTY_PHRASES
        .iter()
        .filter(|p| answer_lower.contains(*p))
        .count()
        + echoes_query;
    let phrase_score = if uncertainty > certainty {
        0.05
    } else if certainty > uncertainty {
        0.2
    } else {
        0.15
    };

    let total = base + sources_score + source_quality + length_score + quality_score + phrase_score;
    ((total.clamp(0.0, 1.0)) * 100.0).round() / 100.0
}

pub fn assess_evidence(sources: &[SearchResult]) -> EvidenceStrength {
    if sources.is_empty() {
        return EvidenceStrength {
            level: "none",
            score: 0.0,
            supporting_sources: 0,
            explanation: "No source documents available to verify the answer.".into(),
        };
    }

    let supporting = sources.iter().filter(|s| s.score >= 0.5).count();
    let (level, score) = match supporting {
        n if n >= 3 => ("strong", (0.8 + (n - 3) as f32 * 0.05).min(1.0)),
        2 => ("moderate", 0.6),
        1 => ("weak", 0.4),
        _ => ("none", 0.1),
    };

    EvidenceStrength {
        level,
        score: (score * 100.0).round() / 100.0,
        supporting_sources: supporting,
        explanation: format!("{supporting} source(s) support this answer with relevant content."),
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn source(score: f32) -> SearchResult {
        SearchResult {
            id: "s".into(),
            filename: "s.pdf".into(),
            file_path: "/d/s.pdf".into(),
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
            hybrid: true,
            reranked: true,
        }
    }

    #[test]
    fn score_is_clamped_into_unit_range() {
        let sources: Vec<SearchResult> = (0..6).map(|_| source(0.95)).collect();
        let answer = "According to the document, the budget specifically increased. ".repeat(5);
        let high = score_answer(&answer, "did the budget increase", &sources, Some(1.0));
        assert!(high <= 1.0);

        let low = score_answer("", "", &[], None);
        assert!((0.0..=1.0).contains(&low));
    }

    #[test]
    fn certainty_language_raises_confidence() {
        // No sources: keeps both totals below the clamp so the phrase
        // factor is observable.
        let certain = score_answer(
            "According to the document, the total is specifically 40.",
            "what is the total",
            &[],
            None,
        );
        let uncertain = score_answer(
            "I'm not sure, it might be around 40, perhaps more.",
            "what is the total",
            &[],
            None,
        );
        assert!(certain > uncertain);
    }

    #[test]
    fn answers_echoing_query_terms_read_as_grounded() {
        let on_topic = score_answer(
            "The quarterly spending figures come to 40 thousand in all.",
            "quarterly spending",
            &[],
            None,
        );
        let off_topic = score_answer(
            "The figures come to 40 thousand in all, as noted previously.",
            "quarterly spending",
            &[],
            None,
        );
        assert!(on_topic > off_topic);
    }

    #[test]
    fn short_answers_score_lower_than_normal_length() {
        let short = score_answer("Yes.", "quarterly spending", &[], None);
        let normal = score_answer(
            "The quarterly report shows spending of 40 thousand across departments, \
             which matches the figures in the attached budget summary.",
            "quarterly spending",
            &[],
            None,
        );
        assert!(normal > short);
    }

    #[test]
    fn evidence_levels_follow_supporting_counts() {
        assert_eq!(assess_evidence(&[]).level, "none");
        assert_eq!(assess_evidence(&[source(0.7)]).level, "weak");
        assert_eq!(assess_evidence(&[source(0.7), source(0.6)]).level, "moderate");
        let strong = assess_evidence(&[source(0.7), source(0.6), source(0.9), source(0.8)]);
        assert_eq!(strong.level, "strong");
        assert!(strong.score > 0.8);
        assert_eq!(assess_evidence(&[source(0.1)]).level, "none");
    }
}
