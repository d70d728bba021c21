//! Ambiguity detection and clarifying-question generation (the "Socrates"
//! role).

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};

#[derive(Clone, Debug, Default, Serialize)]
pub struct AmbiguityReport {
    pub is_ambiguous: bool,
    pub ambiguity_score: f32,
    pub issues: Vec<String>,
    pub possible_interpretations: Vec<String>,
}

pub struct ClarificationAgent {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl ClarificationAgent {
    pub const AGENT_NAME: &'static str = "Socrates (The Inquirer)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Judge whether a query is too vague to act on.
    pub async fn detect_ambiguity(&self, query: &str) -> AmbiguityReport {
        // Cheap structural signals first; they also feed the LLM prompt.
        let mut issues = Vec::new();
        let word_count = query.split_whitespace().count();
        if word_count <= 2 {
            issues.push("very short query".to_string());
        }
        let q_lower = query.to_lowercase();
        if ["that", "it", "this", "thing", "stuff"]
            .iter()
            .any(|p| q_lower.split_whitespace().any(|w| w == *p))
        {
            issues.push("unresolved reference".to_string());
        }

        let prompt = format!(
            r#"Assess whether this document-search query is ambiguous: "{query}"

Known issues: {issues:?}

Return JSON:
{{
    "is_ambiguous": true/false,
    "ambiguity_score": 0.0-1.0,
    "issues": ["issue"],
    "possible_interpretations": ["interpretation"]
}}"#
        );

        let fallback = json!({
            "is_ambiguous": !issues.is_empty(),
            "ambiguity_score": if issues.is_empty() { 0.2 } else { 0.6 },
            "issues": issues,
            "possible_interpretations": []
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

        AmbiguityReport {
            is_ambiguous: value["is_ambiguous"].as_bool().unwrap_or(false),
            ambiguity_score: (value["ambiguity_score"].as_f64().unwrap_or(0.0) as f32)
                .clamp(0.0, 1.0),
            issues: string_list(&value["issues"]),
            possible_interpretations: string_list(&value["possible_interpretations"]),
        }
    }

    /// Up to `max_questions` clarifying questions for an ambiguous query.
    pub async fn generate_clarifying_questions(
        &self,
        query: &str,
        ambiguity: &AmbiguityReport,
        max_questions: usize,
    ) -> Vec<String> {
        let prompt = format!(
            r#"The user asked: "{query}"

The query is ambiguous because: {issues}

Generate {max_questions} short clarifying questions that would let a document search proceed.

Return JSON:
{{
    "questions": ["Question 1?", "Question 2?"]
}}"#,
            issues = if ambiguity.issues.is_empty() {
                "the intent is unclear".to_string()
            } else {
                ambiguity.issues.join(", ")
            }
        );

        let canned = vec![
            "Are you looking for a specific type of document?".to_string(),
            "Do you remember any keywords or dates associated with it?".to_string(),
        ];
        let fallback = json!({ "questions": canned.clone() });

        let questions = match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => {
                let parsed = string_list(&value["questions"]);
                if parsed.is_empty() { canned } else { parsed }
            }
            Err(_) => canned,
        };

        questions.into_iter().take(max_questions).collect()
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
