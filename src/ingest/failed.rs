//! Durable log of per-file ingestion failures.
//!
//! Failures never abort a batch; each one is appended to a JSON array on
//! disk under an async lock so concurrent workers don't interleave writes.
//! A repeated failure of the same file and stage replaces the older entry.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub failure_type: String,
    pub error: String,
    pub timestamp: String,
}

pub struct FailedIngestionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailedIngestionLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub async fn record(&self, filename: &str, failure_type: &str, error: &str) {
        let _guard = self.lock.lock().await;

        let mut failures: Vec<FailureEntry> = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        failures.retain(|f| !(f.filename == filename && f.failure_type == failure_type));
        let mut truncated = error.to_string();
        truncated.truncate(200);
        failures.push(FailureEntry {
            filename: filename.to_string(),
            failure_type: failure_type.to_string(),
            error: truncated,
            timestamp: Utc::now().to_rfc3339(),
        });

        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&failures) {
            Ok(content) => {
                if let Err(err) = tokio::fs::write(&self.path, content).await {
                    tracing::error!(target: "findry::ingest", error = %err, "failed to persist failure log");
                }
            }
            Err(err) => {
                tracing::error!(target: "findry::ingest", error = %err, "failed to encode failure log");
            }
        }
        tracing::warn!(target: "findry::ingest", filename, failure_type, "tracked failed file");
    }

    pub async fn entries(&self) -> Vec<FailureEntry> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_append_and_dedupe_by_file_and_stage() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailedIngestionLog::new(dir.path().join("failed_ingestion.json"));

        log.record("a.pdf", "summarization", "timeout").await;
        log.record("b.png", "image_processing", "bad image").await;
        log.record("a.pdf", "summarization", "timeout again").await;

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        let a = entries.iter().find(|e| e.filename == "a.pdf").unwrap();
        assert_eq!(a.error, "timeout again");
    }

    #[tokio::test]
    async fn long_errors_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailedIngestionLog::new(dir.path().join("failed.json"));
        log.record("x.txt", "extract", &"e".repeat(500)).await;
        assert_eq!(log.entries().await[0].error.len(), 200);
    }
}
