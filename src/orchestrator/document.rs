//! The attached-document pipeline (the "Daedalus" role).
//!
//! Activated when a query carries document attachments. Stages: fetch the
//! indexed content for each attachment, run an LLM analysis pass
//! (classification, entities, themes), extract structured insights with a
//! lexical fallback, then compose a grounded answer that cites documents by
//! filename. Processed documents are cached for the life of the pipeline
//! instance.

use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;

use super::state::HistoryMessage;
use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::steps::StepEvent;
use crate::types::SearchResult;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DocumentAnalysis {
    pub document_type: String,
    pub language: String,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
    pub key_themes: Vec<String>,
    pub technical_domain: String,
    pub complexity: f32,
    pub context_summary: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DocumentInsights {
    pub executive_summary: String,
    pub detailed_summary: String,
    pub key_points: Vec<String>,
    pub key_facts: Vec<String>,
    pub important_quotes: Vec<String>,
    pub action_items: Vec<String>,
    pub dates_deadlines: Vec<String>,
    pub questions_answers: Vec<String>,
    pub numerical_data: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessedDocument {
    pub id: String,
    pub filename: String,
    pub content: String,
    pub analysis: DocumentAnalysis,
    pub insights: DocumentInsights,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocumentAnswer {
    pub answer: String,
    pub confidence: f32,
    #[serde(skip)]
    pub sources: Vec<SearchResult>,
    pub steps: Vec<StepEvent>,
}

pub struct DocumentPipeline {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
    cache: Mutex<FxHashMap<String, ProcessedDocument>>,
}

impl DocumentPipeline {
    pub const AGENT_NAME: &'static str = "Daedalus (The Architect)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.unified_model.name.clone(),
            timeout: settings.ollama.timeout(),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Run the full pipeline over resolved attachments.
    pub async fn process_query(
        &self,
        query: &str,
        documents: Vec<SearchResult>,
        history: &[HistoryMessage],
        mut on_step: impl FnMut(StepEvent),
    ) -> DocumentAnswer {
        let mut steps = Vec::new();
        let mut emit = |event: StepEvent| {
            steps.push(event.clone());
            on_step(event);
        };

        emit(StepEvent::step(
            Self::AGENT_NAME,
            "Activating",
            format!("Processing {} document(s)", documents.len()),
        ));

        let mut processed = Vec::with_capacity(documents.len());
        for document in &documents {
            emit(StepEvent::step(
                Self::AGENT_NAME,
                "Reading Document",
                document.filename.clone(),
            ));
            processed.push(self.process_document(document).await);
        }

        emit(StepEvent::step(
            Self::AGENT_NAME,
            "Composing Answer",
            "Combining extracted document context",
        ));

        let answer = self.answer(query, &processed, history).await;
        let confidence = if answer.len() > 50 { 0.8 } else { 0.5 };

        emit(StepEvent::step(
            Self::AGENT_NAME,
            "Answer Ready",
            format!("confidence {confidence:.1}"),
        ));

        DocumentAnswer {
            answer,
            confidence,
            sources: documents,
            steps,
        }
    }

    async fn process_document(&self, document: &SearchResult) -> ProcessedDocument {
        if let Some(cached) = self.cache.lock().get(&document.id) {
            return cached.clone();
        }

        let content = if document.full_content.is_empty() {
            document.detailed_summary.clone()
        } else {
            document.full_content.clone()
        };

        let analysis = self.analyze(&document.filename, &content).await;
        let insights = self.extract_insights(&document.filename, &content).await;

        let processed = ProcessedDocument {
            id: document.id.clone(),
            filename: document.filename.clone(),
            content,
            analysis,
            insights,
        };
        self.cache
            .lock()
            .insert(document.id.clone(), processed.clone());
        processed
    }

    async fn analyze(&self, filename: &str, content: &str) -> DocumentAnalysis {
        let excerpt: String = content.chars().take(6000).collect();
        let prompt = format!(
            r#"Analyze this document.

Filename: {filename}
Content:
{excerpt}

Return JSON:
{{
    "document_type": "report|invoice|contract|resume|notes|other",
    "language": "English|...",
    "topics": ["topic"],
    "entities": ["person/org/date/location"],
    "key_themes": ["theme"],
    "technical_domain": "finance|legal|engineering|general|...",
    "complexity": 0.0-1.0,
    "context_summary": "two sentences"
}}"#
        );

        let fallback = json!({
            "document_type": "other",
            "language": "English",
            "topics": [],
            "entities": [],
            "key_themes": [],
            "technical_domain": "general",
            "complexity": 0.5,
            "context_summary": format!("Document {filename}.")
        });

        let value = self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
            .unwrap_or_else(|_| json!({}));

        DocumentAnalysis {
            document_type: value["document_type"].as_str().unwrap_or("other").into(),
            language: value["language"].as_str().unwrap_or("English").into(),
            topics: string_list(&value["topics"]),
            entities: string_list(&value["entities"]),
            key_themes: string_list(&value["key_themes"]),
            technical_domain: value["technical_domain"].as_str().unwrap_or("general").into(),
            complexity: (value["complexity"].as_f64().unwrap_or(0.5) as f32).clamp(0.0, 1.0),
            context_summary: value["context_summary"].as_str().unwrap_or_default().into(),
        }
    }

    async fn extract_insights(&self, filename: &str, content: &str) -> DocumentInsights {
        let excerpt: String = content.chars().take(6000).collect();
        let prompt = format!(
            r#"Extract structured insights from this document.

Filename: {filename}
Content:
{excerpt}

Return JSON:
{{
    "executive_summary": "short paragraph",
    "detailed_summary": "longer multi-paragraph summary",
    "key_points": ["point"],
    "key_facts": ["fact"],
    "important_quotes": ["quote"],
    "action_items": ["action"],
    "dates_deadlines": ["date or deadline"],
    "questions_answers": ["question posed in the document and its answer"],
    "numerical_data": ["figure with context"]
}}"#
        );

        match self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.2)
                    .timeout(self.timeout),
                None,
            )
            .await
        {
            Ok(value) => DocumentInsights {
                executive_summary: value["executive_summary"]
                    .as_str()
                    .unwrap_or_default()
                    .into(),
                detailed_summary: value["detailed_summary"]
                    .as_str()
                    .unwrap_or_default()
                    .into(),
                key_points: string_list(&value["key_points"]),
                key_facts: string_list(&value["key_facts"]),
                important_quotes: string_list(&value["important_quotes"]),
                action_items: string_list(&value["action_items"]),
                dates_deadlines: string_list(&value["dates_deadlines"]),
                questions_answers: string_list(&value["questions_answers"]),
                numerical_data: string_list(&value["numerical_data"]),
            },
            Err(_) => lexical_insights(content),
        }
    }

    async fn answer(
        &self,
        query: &str,
        documents: &[ProcessedDocument],
        history: &[HistoryMessage],
    ) -> String {
        let mut contexts = Vec::new();
        for document in documents {
            contexts.push(format!(
                "### {}\nSummary: {}\nKey points:\n{}\nContent excerpt:\n{}",
                document.filename,
                document.insights.executive_summary,
                document
                    .insights
                    .key_points
                    .iter()
                    .take(5)
                    .map(|p| format!("- {p}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                document.content.chars().take(3000).collect::<String>()
            ));
        }

        let history_block = if history.is_empty() {
            String::new()
        } else {
            let start = history.len().saturating_sub(6);
            let lines: Vec<String> = history[start..]
                .iter()
                .map(|m| {
                    format!(
                        "{}: {}",
                        if m.role == "user" { "User" } else { "Assistant" },
                        m.content.chars().take(500).collect::<String>()
                    )
                })
                .collect();
            format!("Previous conversation:\n{}\n\n", lines.join("\n"))
        };

        let prompt = format!(
            "You are answering a question about the user's attached documents.\n\n{history_block}Documents:\n\n{}\n\nQuestion: {query}\n\nAnswer using only the documents above. Cite each document you use by its filename.",
            contexts.join("\n\n")
        );

        let filenames: Vec<&str> = documents.iter().map(|d| d.filename.as_str()).collect();
        let fallback = format!(
            "I reviewed {} but could not produce a complete answer. Please try rephrasing.",
            filenames.join(", ")
        );

        match self
            .llm
            .generate(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.4)
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

/// Lexical fallback when the model produces no usable insight JSON:
/// leading sentences as the summary, list-marked lines as key points,
/// date-shaped strings, and numeric amounts.
pub fn lexical_insights(content: &str) -> DocumentInsights {
    let sentences: Vec<&str> = content
        .split(['.', '\n'])
        .map(str::trim)
        .filter(|s| s.len() > 20)
        .collect();
    let executive_summary = sentences
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(". ");

    let key_points: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with('-')
                || line.starts_with('*')
                || line.starts_with("• ")
                || line
                    .split('.')
                    .next()
                    .is_some_and(|head| head.len() <= 3 && head.chars().all(|c| c.is_ascii_digit()))
        })
        .map(|line| {
            line.trim_start_matches(['-', '*', ' '])
                .trim_start_matches("• ")
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(10)
        .collect();

    let date_re = Regex::new(
        r"(?i)\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4})\b",
    )
    .expect("date pattern");
    let dates_deadlines: Vec<String> = date_re
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .take(10)
        .collect();

    let amount_re =
        Regex::new(r"[$€£]\s?\d[\d,]*(?:\.\d+)?|\b\d[\d,]*(?:\.\d+)?\s?%").expect("amount pattern");
    let numerical_data: Vec<String> = amount_re
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .take(10)
        .collect();

    DocumentInsights {
        executive_summary,
        detailed_summary: String::new(),
        key_points,
        key_facts: Vec::new(),
        important_quotes: Vec::new(),
        action_items: Vec::new(),
        dates_deadlines,
        questions_answers: Vec::new(),
        numerical_data,
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

    #[test]
    fn lexical_fallback_extracts_structure() {
        let content = "The project kicked off in spring with a revised budget of $12,500 for the quarter.\n\
                       - hire two contractors\n\
                       - renew the lease before 2024-03-15\n\
                       1. draft the proposal\n\
                       Progress reached 45% by March 10, 2024 overall.";
        let insights = lexical_insights(content);
        assert!(insights.executive_summary.contains("project kicked off"));
        assert!(insights.key_points.iter().any(|p| p.contains("contractors")));
        assert!(insights.key_points.iter().any(|p| p.contains("proposal")));
        assert!(insights
            .dates_deadlines
            .iter()
            .any(|d| d.contains("2024-03-15")));
        assert!(insights.numerical_data.iter().any(|n| n.contains("12,500")));
        assert!(insights.numerical_data.iter().any(|n| n.contains('%')));
    }

    #[test]
    fn lexical_fallback_on_empty_content_is_empty() {
        let insights = lexical_insights("");
        assert!(insights.executive_summary.is_empty());
        assert!(insights.key_points.is_empty());
    }
}
