//! Content extraction seam.
//!
//! Format-specific text extraction (PDF layout, office documents, OCR) is a
//! collaborator concern; the pipeline only depends on [`ContentExtractor`].
//! The bundled [`LocalExtractor`] handles the formats that need no external
//! tooling: plain text, markdown, CSV (header plus a sample of rows), and
//! images (handed to the vision model downstream). Everything else reports
//! `Unsupported` and lands in the failure log.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::ContentKind;

#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    #[diagnostic(
        code(findry::ingest::unsupported),
        help("Wire a format-specific extractor for this extension.")
    )]
    Unsupported(String),

    #[error("failed to read {path}: {source}")]
    #[diagnostic(code(findry::ingest::read))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Extraction output handed to summarization.
#[derive(Clone, Debug)]
pub struct ExtractedContent {
    pub kind: ContentKind,
    pub text: String,
    pub page_count: u32,
    /// Set for images: the file to send to the vision model.
    pub image_path: Option<PathBuf>,
}

impl ExtractedContent {
    pub fn text(text: String) -> Self {
        Self {
            kind: ContentKind::Text,
            text,
            page_count: 0,
            image_path: None,
        }
    }
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<ExtractedContent, ExtractError>;
}

/// Rows of a spreadsheet included in the textual sample.
const SPREADSHEET_SAMPLE_ROWS: usize = 20;

pub struct LocalExtractor;

#[async_trait]
impl ContentExtractor for LocalExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedContent, ExtractError> {
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        match extension.as_str() {
            ".txt" | ".md" => {
                let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(ExtractedContent::text(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))
            }
            ".csv" => {
                let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let content = String::from_utf8_lossy(&bytes);
                let mut lines = content.lines();
                let header = lines.next().unwrap_or_default();
                let rows: Vec<&str> = lines.clone().take(SPREADSHEET_SAMPLE_ROWS).collect();
                let total_rows = lines.count();

                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let columns = header.split(',').count();
                let mut text = format!(
                    "Spreadsheet: {filename}\nShape: {total_rows} rows x {columns} columns\nColumns: {header}\n\nSample data:\n"
                );
                for row in rows {
                    text.push_str(row);
                    text.push('\n');
                }
                Ok(ExtractedContent {
                    kind: ContentKind::Spreadsheet,
                    text,
                    page_count: 0,
                    image_path: None,
                })
            }
            ".png" | ".jpg" | ".jpeg" | ".gif" | ".bmp" => Ok(ExtractedContent {
                kind: ContentKind::Image,
                text: String::new(),
                page_count: 0,
                image_path: Some(path.to_path_buf()),
            }),
            other => Err(ExtractError::Unsupported(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn extracts_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello world").unwrap();

        let content = LocalExtractor.extract(&path).await.unwrap();
        assert_eq!(content.kind, ContentKind::Text);
        assert_eq!(content.text, "hello world");
    }

    #[tokio::test]
    async fn csv_sample_includes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expenses.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "date,amount,category").unwrap();
        for i in 0..30 {
            writeln!(file, "2024-01-{:02},10.{i},food", (i % 28) + 1).unwrap();
        }

        let content = LocalExtractor.extract(&path).await.unwrap();
        assert_eq!(content.kind, ContentKind::Spreadsheet);
        assert!(content.text.contains("Columns: date,amount,category"));
        assert!(content.text.contains("30 rows x 3 columns"));
    }

    #[tokio::test]
    async fn images_return_their_path_for_vision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let content = LocalExtractor.extract(&path).await.unwrap();
        assert_eq!(content.kind, ContentKind::Image);
        assert_eq!(content.image_path.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.pdf");
        std::fs::write(&path, b"%PDF-").unwrap();
        let err = LocalExtractor.extract(&path).await.unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(ext) if ext == ".pdf"));
    }
}
