//! One-record-per-file ingestion.
//!
//! For each source file the pipeline computes a stable id, extracts text,
//! generates the comprehensive summary (text, spreadsheet, or vision path),
//! classifies the document type, embeds the summary under the exclusive
//! encoder lock, and indexes a single [`DocumentRecord`]. Re-processing the
//! same path is idempotent. Per-file failures go to the durable failure log
//! and never abort a batch.

pub mod extract;
pub mod failed;
pub mod summary;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::Serialize;

use crate::config::Settings;
use crate::engine::SearchBackend;
use crate::graph::KnowledgeGraph;
use crate::llm::{EmbeddingService, LlmClient, LlmRequest};
use crate::types::{ContentKind, DocumentRecord, document_id};

pub use extract::{ContentExtractor, ExtractError, ExtractedContent, LocalExtractor};
pub use failed::FailedIngestionLog;
pub use summary::{ParsedSummary, parse_detailed_response};

/// Retries for the vision captioning call, with exponential backoff.
const IMAGE_MAX_RETRIES: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum IngestOutcome {
    Success { id: String },
    Skipped { id: String },
    Failed { reason: String },
}

/// Per-file progress reported to the status callback during batches.
#[derive(Clone, Debug, Serialize)]
pub struct IngestProgress {
    pub processed: usize,
    pub total: usize,
    pub current_file: String,
}

pub type ProgressCallback = Arc<dyn Fn(IngestProgress) + Send + Sync>;

pub struct IngestionPipeline {
    extractor: Arc<dyn ContentExtractor>,
    llm: Arc<LlmClient>,
    embeddings: Arc<EmbeddingService>,
    backend: Arc<dyn SearchBackend>,
    graph: Option<Arc<KnowledgeGraph>>,
    failed: Arc<FailedIngestionLog>,
    summary_model: String,
    summary_max_length: usize,
    max_content_length: usize,
    supported_extensions: Vec<String>,
    batch_size: usize,
    llm_timeout: Duration,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        extractor: Arc<dyn ContentExtractor>,
        llm: Arc<LlmClient>,
        embeddings: Arc<EmbeddingService>,
        backend: Arc<dyn SearchBackend>,
        graph: Option<Arc<KnowledgeGraph>>,
        failed: Arc<FailedIngestionLog>,
    ) -> Self {
        Self {
            extractor,
            llm,
            embeddings,
            backend,
            graph,
            failed,
            summary_model: settings.ollama.unified_model.name.clone(),
            summary_max_length: settings.ingestion.summary.max_length,
            max_content_length: settings.ingestion.summary.max_content_length,
            supported_extensions: settings.watcher.supported_extensions.clone(),
            batch_size: settings.watcher.batch_size.max(1),
            llm_timeout: settings.ollama.timeout(),
        }
    }

    /// Process one file into one indexed record. Idempotent on the path:
    /// an already-indexed document is skipped.
    pub async fn process_file(&self, path: &Path) -> IngestOutcome {
        let id = document_id(&absolute(path));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match self.backend.document_exists(&id).await {
            Ok(true) => {
                tracing::info!(target: "findry::ingest", filename, "skipping existing file");
                return IngestOutcome::Skipped { id };
            }
            Ok(false) => {}
            Err(err) => {
                self.failed
                    .record(&filename, "existence_check", &err.to_string())
                    .await;
                return IngestOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        }

        tracing::info!(target: "findry::ingest", filename, "processing file");

        let content = match self.extractor.extract(path).await {
            Ok(content) => content,
            Err(err) => {
                self.failed
                    .record(&filename, "extraction", &err.to_string())
                    .await;
                return IngestOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let parsed = self.summarize(&content, path, &filename).await;
        let summary = if parsed.summary.is_empty() {
            // The record must have a non-empty summary: it is the embedded
            // text. Fall back to raw content, then to the bare filename.
            let fallback: String = content.text.chars().take(2000).collect();
            if fallback.trim().is_empty() {
                format!("Document: {filename}")
            } else {
                fallback
            }
        } else {
            parsed.summary.clone()
        };

        let document_type = classify_document_type(path);
        let (embedding, embedding_ok) = match self.embeddings.encode(&summary).await {
            Ok(vector) => (vector, true),
            Err(err) => {
                tracing::warn!(
                    target: "findry::ingest",
                    filename,
                    error = %err,
                    "embedding failed; indexing zero vector"
                );
                self.failed
                    .record(&filename, "embedding", &err.to_string())
                    .await;
                (self.embeddings.zero_vector(), false)
            }
        };

        let metadata = file_metadata(path).await;
        let word_count = if content.text.is_empty() {
            summary.split_whitespace().count() as u64
        } else {
            content.text.split_whitespace().count() as u64
        };

        let full_content: String = if content.text.is_empty() {
            summary.clone()
        } else {
            content.text.chars().take(self.max_content_length).collect()
        };

        let record = DocumentRecord {
            id: id.clone(),
            filename: filename.clone(),
            file_path: absolute(path).display().to_string(),
            file_type: extension_of(path),
            content_type: content.kind,
            document_type,
            is_image: content.kind == ContentKind::Image,
            detailed_summary: summary,
            full_content,
            keywords: parsed.keywords.clone(),
            entities: parsed.entities_flat.clone(),
            entities_structured: parsed.entities_structured.clone(),
            topics: parsed.topics.clone(),
            vector_embedding: embedding,
            embedding_ok,
            word_count,
            page_count: content.page_count,
            file_size_bytes: metadata.size,
            created_at: Utc::now(),
            last_modified: metadata.modified,
        };

        if let Err(err) = self.backend.index_document(&record).await {
            self.failed
                .record(&filename, "indexing", &err.to_string())
                .await;
            return IngestOutcome::Failed {
                reason: err.to_string(),
            };
        }

        if let Some(graph) = &self.graph {
            self.project_to_graph(graph, &id, &parsed).await;
        }

        tracing::info!(target: "findry::ingest", filename, "indexed document");
        IngestOutcome::Success { id }
    }

    /// Process every supported file under a directory, in chunks of the
    /// configured batch size with files inside a chunk running concurrently.
    pub async fn process_directory(
        &self,
        directory: &Path,
        progress: Option<ProgressCallback>,
    ) -> Vec<IngestOutcome> {
        let files = self.collect_files(directory).await;
        let total = files.len();
        tracing::info!(
            target: "findry::ingest",
            total,
            directory = %directory.display(),
            "starting directory ingestion"
        );

        let mut outcomes = Vec::with_capacity(total);
        let mut processed = 0usize;

        for chunk in files.chunks(self.batch_size) {
            let mut in_flight: FuturesUnordered<_> = chunk
                .iter()
                .map(|path| async move { (path.clone(), self.process_file(path).await) })
                .collect();
            while let Some((path, outcome)) = in_flight.next().await {
                processed += 1;
                if let Some(callback) = &progress {
                    callback(IngestProgress {
                        processed,
                        total,
                        current_file: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    });
                }
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Handle a watcher deletion signal: drop the record for this path.
    pub async fn remove_file(&self, path: &Path) {
        let id = document_id(&absolute(path));
        if let Err(err) = self.backend.delete_document(&id).await {
            tracing::error!(
                target: "findry::ingest",
                path = %path.display(),
                error = %err,
                "failed to delete document"
            );
        }
    }

    async fn collect_files(&self, directory: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![directory.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if self.supported_extensions.contains(&extension_of(&path)) {
                    files.push(path);
                }
            }
        }
        files.sort();
        files
    }

    async fn summarize(
        &self,
        content: &ExtractedContent,
        path: &Path,
        filename: &str,
    ) -> ParsedSummary {
        match content.kind {
            ContentKind::Image => self.summarize_image(content, path, filename).await,
            ContentKind::Spreadsheet => {
                let prompt = summary::spreadsheet_summary_prompt(&content.text);
                self.summarize_text_like(prompt, filename, 2500).await
            }
            ContentKind::Text => {
                if content.text.trim().len() < 50 {
                    return ParsedSummary {
                        summary: format!("Document: {filename}"),
                        keywords: stem_keywords(path),
                        ..Default::default()
                    };
                }
                let truncated: String = content.text.chars().take(self.summary_max_length).collect();
                let prompt = summary::text_summary_prompt(&truncated);
                self.summarize_text_like(prompt, filename, 4000).await
            }
        }
    }

    async fn summarize_text_like(
        &self,
        prompt: String,
        filename: &str,
        num_predict: u32,
    ) -> ParsedSummary {
        let request = LlmRequest::new(&self.summary_model, prompt)
            .temperature(0.3)
            .think(true)
            .num_predict(num_predict)
            .timeout(self.llm_timeout);
        match self.llm.generate(request).await {
            Ok(reply) => parse_detailed_response(&reply.text),
            Err(err) => {
                self.failed
                    .record(filename, "summarization", &err.to_string())
                    .await;
                ParsedSummary::default()
            }
        }
    }

    async fn summarize_image(
        &self,
        content: &ExtractedContent,
        path: &Path,
        filename: &str,
    ) -> ParsedSummary {
        let image_path = content.image_path.as_deref().unwrap_or(path);
        let bytes = match tokio::fs::read(image_path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => {
                self.failed
                    .record(filename, "image_processing", "unreadable or empty image")
                    .await;
                return image_fallback(path, filename);
            }
        };
        let encoded = BASE64.encode(&bytes);

        for attempt in 0..IMAGE_MAX_RETRIES {
            let request = LlmRequest::new(&self.summary_model, summary::image_summary_prompt())
                .temperature(0.3)
                .images(vec![encoded.clone()])
                .num_predict(1500)
                .max_retries(1)
                .timeout(Duration::from_secs(90));

            match self.llm.generate(request).await {
                Ok(reply) if reply.text.len() >= 20 => {
                    if reply.text.contains("SUMMARY:") {
                        let parsed = parse_detailed_response(&reply.text);
                        if !parsed.summary.is_empty() {
                            return parsed;
                        }
                    }
                    return ParsedSummary {
                        summary: reply.text,
                        keywords: stem_keywords(path),
                        topics: vec!["image".into()],
                        ..Default::default()
                    };
                }
                Ok(_) | Err(_) => {
                    tokio::time::sleep(Duration::from_secs(1 << attempt.min(4))).await;
                }
            }
        }

        self.failed
            .record(filename, "image_processing", "all retries failed")
            .await;
        image_fallback(path, filename)
    }

    async fn project_to_graph(&self, graph: &KnowledgeGraph, doc_id: &str, parsed: &ParsedSummary) {
        for (category, names) in &parsed.entities_structured {
            for name in names {
                let entity_id = entity_graph_id(name, category);
                if let Err(err) = graph
                    .add_entity(&entity_id, name, category, Some(doc_id))
                    .await
                {
                    tracing::warn!(target: "findry::ingest", error = %err, "entity projection failed");
                }
            }
        }
        for triple in &parsed.relationships {
            let source_category = category_of(&parsed.entities_structured, &triple.source);
            let target_category = category_of(&parsed.entities_structured, &triple.target);
            let source_id = entity_graph_id(&triple.source, &source_category);
            let target_id = entity_graph_id(&triple.target, &target_category);
            // Relationship endpoints may name entities the structured
            // sections missed; create them on demand.
            let _ = graph
                .add_entity(&source_id, &triple.source, &source_category, Some(doc_id))
                .await;
            let _ = graph
                .add_entity(&target_id, &triple.target, &target_category, Some(doc_id))
                .await;
            if let Err(err) = graph
                .add_relationship(&source_id, &target_id, &triple.relation, Some(doc_id))
                .await
            {
                tracing::warn!(target: "findry::ingest", error = %err, "relationship projection failed");
            }
        }
    }
}

fn category_of(structured: &std::collections::BTreeMap<String, Vec<String>>, name: &str) -> String {
    for (category, names) in structured {
        if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return category.clone();
        }
    }
    "concept".to_string()
}

fn entity_graph_id(name: &str, category: &str) -> String {
    format!(
        "{}_{}",
        category.to_lowercase(),
        name.to_lowercase().replace(' ', "_")
    )
}

fn image_fallback(path: &Path, filename: &str) -> ParsedSummary {
    ParsedSummary {
        summary: format!("Image file: {filename}. Unable to generate detailed description."),
        keywords: stem_keywords(path),
        topics: vec!["image".into()],
        ..Default::default()
    }
}

fn stem_keywords(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
        .unwrap_or_default()
}

/// Document type from filename patterns first, extension second.
pub fn classify_document_type(path: &Path) -> String {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let extension = extension_of(path);

    if matches!(extension.as_str(), ".png" | ".jpg" | ".jpeg" | ".gif" | ".bmp") {
        if filename.contains("screenshot") {
            return "screenshot".into();
        }
        if filename.contains("diagram") || filename.contains("chart") {
            return "diagram".into();
        }
        return "image".into();
    }

    for (pattern, doc_type) in [
        ("invoice", "invoice"),
        ("receipt", "receipt"),
        ("report", "report"),
        ("contract", "contract"),
        ("agreement", "contract"),
        ("resume", "resume"),
        ("cv", "resume"),
        ("presentation", "presentation"),
    ] {
        if filename.contains(pattern) {
            return doc_type.into();
        }
    }

    match extension.as_str() {
        ".xlsx" | ".csv" => "spreadsheet".into(),
        ".pdf" => "pdf_document".into(),
        ".docx" => "word_document".into(),
        ".txt" | ".md" => "text_document".into(),
        _ => "document".into(),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

struct FileMetadata {
    size: u64,
    modified: DateTime<Utc>,
}

async fn file_metadata(path: &Path) -> FileMetadata {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => FileMetadata {
            size: metadata.len(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        },
        Err(_) => FileMetadata {
            size: 0,
            modified: Utc::now(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_filename_pattern_before_extension() {
        assert_eq!(
            classify_document_type(Path::new("/d/acme_invoice_march.pdf")),
            "invoice"
        );
        assert_eq!(
            classify_document_type(Path::new("/d/Screenshot 2024-01-05.png")),
            "screenshot"
        );
        assert_eq!(classify_document_type(Path::new("/d/vacation.jpg")), "image");
        assert_eq!(
            classify_document_type(Path::new("/d/jane_resume.docx")),
            "resume"
        );
        assert_eq!(
            classify_document_type(Path::new("/d/plain.pdf")),
            "pdf_document"
        );
        assert_eq!(
            classify_document_type(Path::new("/d/notes.md")),
            "text_document"
        );
        assert_eq!(
            classify_document_type(Path::new("/d/data.csv")),
            "spreadsheet"
        );
    }

    #[test]
    fn stem_keywords_replace_separators() {
        assert_eq!(
            stem_keywords(Path::new("/d/q1_budget-2024.pdf")),
            "q1 budget 2024"
        );
    }

    #[test]
    fn graph_ids_are_stable_per_name_and_category() {
        assert_eq!(
            entity_graph_id("Acme Corp", "companies"),
            "companies_acme_corp"
        );
    }
}
