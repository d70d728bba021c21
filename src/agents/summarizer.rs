//! Multi-document summarization (the "Thoth" role).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::types::SearchResult;

/// Above this count the agent summarizes hierarchically: halves first,
/// then a combining pass.
const HIERARCHICAL_THRESHOLD: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryType {
    Comprehensive,
    Brief,
    BulletPoints,
}

impl SummaryType {
    fn instruction(&self) -> &'static str {
        match self {
            SummaryType::Comprehensive => {
                "Write a comprehensive multi-paragraph summary covering every document."
            }
            SummaryType::Brief => "Write a brief summary of at most four sentences.",
            SummaryType::BulletPoints => "Write a bullet list, one bullet per key point.",
        }
    }
}

pub struct SummarizationAgent {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl SummarizationAgent {
    pub const AGENT_NAME: &'static str = "Thoth (The Scribe)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Summarize a result set. Falls back to a filename listing when the
    /// model is unavailable.
    pub async fn summarize_documents(
        &self,
        documents: &[SearchResult],
        summary_type: SummaryType,
    ) -> String {
        if documents.is_empty() {
            return String::new();
        }

        if documents.len() > HIERARCHICAL_THRESHOLD {
            return self.summarize_hierarchical(documents, summary_type).await;
        }
        self.summarize_flat(documents, summary_type).await
    }

    async fn summarize_flat(
        &self,
        documents: &[SearchResult],
        summary_type: SummaryType,
    ) -> String {
        let blocks: Vec<String> = documents
            .iter()
            .map(|doc| {
                format!(
                    "## {}\n{}",
                    doc.filename,
                    doc.detailed_summary.chars().take(1500).collect::<String>()
                )
            })
            .collect();

        let prompt = format!(
            "{}\n\nDocuments:\n\n{}",
            summary_type.instruction(),
            blocks.join("\n\n")
        );

        let fallback = listing_fallback(documents);
        match self
            .llm
            .generate(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
                    .timeout(self.timeout)
                    .fallback(fallback),
            )
            .await
        {
            Ok(reply) => reply.text,
            Err(_) => listing_fallback(documents),
        }
    }

    /// Two-tier summarization: summarize each half, then combine.
    async fn summarize_hierarchical(
        &self,
        documents: &[SearchResult],
        summary_type: SummaryType,
    ) -> String {
        let mid = documents.len() / 2;
        let first = self.summarize_flat(&documents[..mid], SummaryType::Brief).await;
        let second = self.summarize_flat(&documents[mid..], SummaryType::Brief).await;

        let prompt = format!(
            "{}\n\nCombine these two partial summaries of one document set into a single coherent summary:\n\nPart 1:\n{first}\n\nPart 2:\n{second}",
            summary_type.instruction()
        );

        let fallback = format!("{first}\n\n{second}");
        match self
            .llm
            .generate(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
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

fn listing_fallback(documents: &[SearchResult]) -> String {
    let names: Vec<&str> = documents.iter().map(|d| d.filename.as_str()).collect();
    format!("Found {} documents: {}", documents.len(), names.join(", "))
}
