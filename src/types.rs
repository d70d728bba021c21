//! Core domain types for the findry search service.
//!
//! This module defines the data shapes the rest of the system agrees on:
//! the indexed [`DocumentRecord`] (one record per source file), the
//! [`SearchResult`] rows flowing through retrieval and ranking, and the
//! typed [`SearchFilters`] extracted from user queries.
//!
//! The one-record-per-file contract is the load-bearing invariant: every
//! source file maps to exactly one record, identified by the md5 hex digest
//! of its absolute path, whose embedding is always computed from
//! `detailed_summary` (never from the full content).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Coarse content category of an indexed file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Spreadsheet,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::Spreadsheet => "spreadsheet",
        }
    }
}

/// The single indexed record for one source file.
///
/// Invariants:
/// - `id` is the md5 hex digest of the absolute file path ([`document_id`]).
/// - `vector_embedding` is computed from `detailed_summary`, which must be
///   non-empty, and its length equals the configured embedding dimension.
/// - `entities` (the flat set) is a superset of the union of
///   `entities_structured` values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub file_path: String,

    /// File extension including the dot, lowercased (".pdf", ".png", ...).
    pub file_type: String,
    pub content_type: ContentKind,
    /// Fine-grained classification: invoice, report, contract, resume,
    /// screenshot, image, pdf_document, ...
    pub document_type: String,
    pub is_image: bool,

    /// The canonical searchable text: a comprehensive multi-paragraph
    /// summary. The embedding is computed from this field.
    pub detailed_summary: String,
    /// Extracted source text, truncated to the configured limit.
    pub full_content: String,

    /// Comma-joined keyword list.
    pub keywords: String,
    /// Flat entity set used for keyword filtering.
    pub entities: Vec<String>,
    /// Category -> entity names (persons, skills, companies, ...).
    pub entities_structured: BTreeMap<String, Vec<String>>,
    pub topics: Vec<String>,

    pub vector_embedding: Vec<f32>,
    /// False when the embedding fell back to a zero vector; such documents
    /// remain searchable through BM25 only.
    pub embedding_ok: bool,

    pub word_count: u64,
    pub page_count: u32,
    pub file_size_bytes: u64,

    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Stable document identity: md5 hex digest of the absolute path.
pub fn document_id(path: &Path) -> String {
    let digest = Md5::digest(path.to_string_lossy().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A retrieval result row: the indexed document fields (embedding stripped)
/// plus the scores attached along the pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_type: String,
    pub document_type: String,
    pub is_image: bool,
    pub detailed_summary: String,
    #[serde(default)]
    pub full_content: String,
    pub keywords: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,

    /// The current ranking score. After fusion this is the RRF score; after
    /// reranking it is the sigmoid-normalized cross-encoder score (plus any
    /// feedback boost), clamped to [0, 1].
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f32>,
    #[serde(default)]
    pub hybrid: bool,
    #[serde(default)]
    pub reranked: bool,
}

impl SearchResult {
    /// Build a result row from an indexed record, with the embedding
    /// stripped and no score attached yet.
    pub fn from_record(record: &DocumentRecord) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            file_path: record.file_path.clone(),
            file_type: record.file_type.clone(),
            document_type: record.document_type.clone(),
            is_image: record.is_image,
            detailed_summary: record.detailed_summary.clone(),
            full_content: record.full_content.clone(),
            keywords: record.keywords.clone(),
            entities: record.entities.clone(),
            topics: record.topics.clone(),
            score: 0.0,
            raw_score: None,
            vector_score: None,
            bm25_score: None,
            hybrid: false,
            reranked: false,
        }
    }
}

/// Typed filters extracted from a query or supplied by the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// File extensions including the dot ([".pdf"], [".png", ".jpg"], ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_image: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeFilter>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.file_type.is_none()
            && self.document_type.is_none()
            && self.is_image.is_none()
            && self.time.is_none()
    }

    /// Merge another filter set into this one; fields already present win.
    pub fn merge(&mut self, other: &SearchFilters) {
        if self.file_type.is_none() {
            self.file_type = other.file_type.clone();
        }
        if self.document_type.is_none() {
            self.document_type = other.document_type.clone();
        }
        if self.is_image.is_none() {
            self.is_image = other.is_image;
        }
        if self.time.is_none() {
            self.time = other.time.clone();
        }
    }
}

/// Time constraint recognized in queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeFilter {
    /// "last 3 weeks", "past 10 days"
    Relative { amount: u32, unit: TimeUnit },
    /// "today", "last week", "this month", ...
    Named { range: NamedRange },
    /// "Q1 2024", "Q3"
    Quarter { quarter: u8, year: Option<i32> },
    /// "March 2024", bare "March"
    Month { month: u32, year: Option<i32> },
    /// bare "2024"
    Year { year: i32 },
    /// "from January to March" (free-form endpoints)
    Span { start: String, end: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Days,
    Weeks,
    Months,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedRange {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn document_id_is_stable_md5_hex() {
        let a = document_id(&PathBuf::from("/data/reports/q1.pdf"));
        let b = document_id(&PathBuf::from("/data/reports/q1.pdf"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        let other = document_id(&PathBuf::from("/data/reports/q2.pdf"));
        assert_ne!(a, other);
    }

    #[test]
    fn filter_merge_keeps_existing_fields() {
        let mut base = SearchFilters {
            file_type: Some(vec![".pdf".into()]),
            ..Default::default()
        };
        let other = SearchFilters {
            file_type: Some(vec![".png".into()]),
            document_type: Some("report".into()),
            ..Default::default()
        };
        base.merge(&other);
        assert_eq!(base.file_type.as_deref(), Some(&[".pdf".to_string()][..]));
        assert_eq!(base.document_type.as_deref(), Some("report"));
    }
}
