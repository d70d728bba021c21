//! Document comparison, aggregation, and insight extraction (the
//! "Aristotle" role).

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::types::SearchResult;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ComparisonResult {
    pub similarities: Vec<String>,
    pub differences: Vec<String>,
    pub unique_aspects: Vec<String>,
    pub summary: String,
}

pub struct AnalysisAgent {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl AnalysisAgent {
    pub const AGENT_NAME: &'static str = "Aristotle (The Analyst)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Compare at least two documents; `None` when fewer are supplied.
    pub async fn compare_documents(&self, documents: &[SearchResult]) -> Option<ComparisonResult> {
        if documents.len() < 2 {
            return None;
        }

        let blocks: Vec<String> = documents
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, doc)| {
                format!(
                    "Document {}: {}\n{}",
                    i + 1,
                    doc.filename,
                    truncate(&doc.detailed_summary, 800)
                )
            })
            .collect();

        let prompt = format!(
            r#"Compare these documents:

{}

Return JSON:
{{
    "similarities": ["similarity"],
    "differences": ["difference"],
    "unique_aspects": ["aspect unique to one document"],
    "summary": "one-paragraph comparison"
}}"#,
            blocks.join("\n\n")
        );

        let fallback = json!({
            "similarities": [],
            "differences": [],
            "unique_aspects": [],
            "summary": format!("Compared {} documents.", documents.len().min(3))
        });

        let value = self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
            .ok()?;

        Some(ComparisonResult {
            similarities: string_list(&value["similarities"]),
            differences: string_list(&value["differences"]),
            unique_aspects: string_list(&value["unique_aspects"]),
            summary: value["summary"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Short bullet insights across the result set for a query.
    pub async fn generate_insights(
        &self,
        documents: &[SearchResult],
        query: &str,
    ) -> Vec<String> {
        if documents.is_empty() {
            return Vec::new();
        }

        let listing: Vec<String> = documents
            .iter()
            .take(5)
            .map(|doc| format!("- {}: {}", doc.filename, truncate(&doc.detailed_summary, 300)))
            .collect();

        let prompt = format!(
            r#"Given these documents found for the query "{query}":

{}

Extract 3-5 short, concrete insights (patterns, notable facts, gaps).

Return JSON:
{{
    "insights": ["insight"]
}}"#,
            listing.join("\n")
        );

        let fallback = json!({ "insights": [] });
        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.4)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => string_list(&value["insights"]),
            Err(_) => Vec::new(),
        }
    }

    /// Aggregate numeric or categorical facts mentioned across documents.
    pub async fn aggregate_data(&self, documents: &[SearchResult], query: &str) -> Vec<String> {
        if documents.is_empty() {
            return Vec::new();
        }
        let listing: Vec<String> = documents
            .iter()
            .take(5)
            .map(|doc| format!("- {}: {}", doc.filename, truncate(&doc.detailed_summary, 300)))
            .collect();
        let prompt = format!(
            r#"For the query "{query}", aggregate the quantitative facts found in:

{}

Return JSON:
{{
    "aggregates": ["total/average/count statement"]
}}"#,
            listing.join("\n")
        );
        let fallback = json!({ "aggregates": [] });
        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => string_list(&value["aggregates"]),
            Err(_) => Vec::new(),
        }
    }

    /// Time-oriented observations (increases, decreases, recurring items).
    pub async fn detect_trends(&self, documents: &[SearchResult], query: &str) -> Vec<String> {
        if documents.len() < 2 {
            return Vec::new();
        }
        let listing: Vec<String> = documents
            .iter()
            .take(5)
            .map(|doc| format!("- {}: {}", doc.filename, truncate(&doc.detailed_summary, 300)))
            .collect();
        let prompt = format!(
            r#"For the query "{query}", identify trends over time across:

{}

Return JSON:
{{
    "trends": ["trend statement"]
}}"#,
            listing.join("\n")
        );
        let fallback = json!({ "trends": [] });
        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
        {
            Ok(value) => string_list(&value["trends"]),
            Err(_) => Vec::new(),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
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
