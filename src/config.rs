//! Configuration for the findry service.
//!
//! Settings are resolved in layers, later wins:
//!
//! 1. Compiled defaults
//! 2. A TOML file (`findry.toml` by default)
//! 3. Environment variables (`FINDRY_*`), loaded through dotenv
//!
//! The full tree mirrors the deployment surface: model runtime, embedding
//! and cross-encoder models, search engine connection, retrieval tuning,
//! ingestion limits, watcher batching, session memory, and model lifecycle
//! policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ollama: OllamaSettings,
    pub models: ModelSettings,
    pub engine: EngineSettings,
    pub search: SearchSettings,
    pub ingestion: IngestionSettings,
    pub watcher: WatcherSettings,
    pub memory: MemorySettings,
    pub model_management: ModelManagementSettings,
    pub server: ServerSettings,
    pub data: DataSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama: OllamaSettings::default(),
            models: ModelSettings::default(),
            engine: EngineSettings::default(),
            search: SearchSettings::default(),
            ingestion: IngestionSettings::default(),
            watcher: WatcherSettings::default(),
            memory: MemorySettings::default(),
            model_management: ModelManagementSettings::default(),
            server: ServerSettings::default(),
            data: DataSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub text_model: NamedModel,
    pub vision_model: NamedModel,
    /// Vision-capable model used for ingestion summarization and the
    /// attached-document pipeline.
    pub unified_model: NamedModel,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            text_model: NamedModel::new("qwen3:8b"),
            vision_model: NamedModel::new("qwen3-vl:8b"),
            unified_model: NamedModel::new("qwen3-vl:8b"),
            timeout_secs: 120,
            max_retries: 3,
        }
    }
}

impl OllamaSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedModel {
    pub name: String,
}

impl NamedModel {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NamedModel {
    fn default() -> Self {
        Self::new("qwen3:8b")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub embedding: EmbeddingModelSettings,
    pub cross_encoder: CrossEncoderSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            embedding: EmbeddingModelSettings::default(),
            cross_encoder: CrossEncoderSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingModelSettings {
    pub name: String,
    /// Fixed dimension of the vector field; must match the embedder output.
    pub dimension: usize,
    pub base_url: String,
}

impl Default for EmbeddingModelSettings {
    fn default() -> Self {
        Self {
            name: "nomic-embed-text".into(),
            dimension: 768,
            base_url: "http://localhost:11434".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossEncoderSettings {
    pub name: String,
    pub max_length: usize,
    pub base_url: String,
}

impl Default for CrossEncoderSettings {
    fn default() -> Self {
        Self {
            name: "cross-encoder/ms-marco-MiniLM-L-6-v2".into(),
            max_length: 512,
            base_url: "http://localhost:8501".into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub host: String,
    pub port: u16,
    pub index_name: String,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9200,
            index_name: "findry-documents".into(),
            username: "admin".into(),
            password: "admin".into(),
            use_ssl: false,
        }
    }
}

impl EngineSettings {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub hybrid: HybridSettings,
    /// Candidates pulled from the engine before reranking.
    pub recall_top_k: usize,
    /// Results returned after reranking.
    pub rerank_top_k: usize,
    pub query_expansion: QueryExpansionSettings,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            hybrid: HybridSettings::default(),
            recall_top_k: 50,
            rerank_top_k: 5,
            query_expansion: QueryExpansionSettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSettings {
    pub enabled: bool,
    pub vector_weight: f32,
    pub bm25_weight: f32,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            vector_weight: 0.7,
            bm25_weight: 0.3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryExpansionSettings {
    pub enabled: bool,
}

impl Default for QueryExpansionSettings {
    fn default() -> Self {
        Self { enabled: false }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub summary: SummarySettings,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            summary: SummarySettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    /// Maximum characters of source text fed to summarization.
    pub max_length: usize,
    /// Maximum characters of extracted text stored as `full_content`.
    pub max_content_length: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            max_length: 10_000,
            max_content_length: 50_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub supported_extensions: Vec<String>,
    pub batch_size: usize,
    pub debounce_seconds: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            supported_extensions: [
                ".txt", ".md", ".pdf", ".docx", ".xlsx", ".csv", ".png", ".jpg", ".jpeg", ".gif",
                ".bmp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            batch_size: 4,
            debounce_seconds: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Rolling window of turns kept per session.
    pub session_window: usize,
    /// Session idle expiry in seconds.
    pub session_ttl_secs: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            session_window: 10,
            session_ttl_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelManagementSettings {
    pub auto_unload: bool,
    pub keep_both_loaded: bool,
    pub unload_after_seconds: u64,
}

impl Default for ModelManagementSettings {
    fn default() -> Self {
        Self {
            auto_unload: true,
            keep_both_loaded: false,
            unload_after_seconds: 300,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Consumer-side timeout for step streaming, in seconds.
    pub stream_timeout_secs: u64,
    /// Bounded capacity of each per-session step queue.
    pub step_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            stream_timeout_secs: 300,
            step_queue_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory holding the sqlite stores and the failed-ingestion log.
    pub dir: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the TOML file if present, then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new("findry.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `FINDRY_*` environment variable overrides for the settings
    /// most commonly changed per deployment.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("FINDRY_OLLAMA_BASE_URL") {
            self.ollama.base_url = v;
        }
        if let Ok(v) = std::env::var("FINDRY_TEXT_MODEL") {
            self.ollama.text_model.name = v;
        }
        if let Ok(v) = std::env::var("FINDRY_UNIFIED_MODEL") {
            self.ollama.unified_model.name = v;
        }
        if let Ok(v) = std::env::var("FINDRY_ENGINE_HOST") {
            self.engine.host = v;
        }
        if let Ok(v) = std::env::var("FINDRY_ENGINE_PORT")
            && let Ok(port) = v.parse()
        {
            self.engine.port = port;
        }
        if let Ok(v) = std::env::var("FINDRY_ENGINE_INDEX") {
            self.engine.index_name = v;
        }
        if let Ok(v) = std::env::var("FINDRY_ENGINE_USERNAME") {
            self.engine.username = v;
        }
        if let Ok(v) = std::env::var("FINDRY_ENGINE_PASSWORD") {
            self.engine.password = v;
        }
        if let Ok(v) = std::env::var("FINDRY_BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("FINDRY_DATA_DIR") {
            self.data.dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.embedding.dimension == 0 {
            return Err(ConfigError::Invalid(
                "models.embedding.dimension must be non-zero".into(),
            ));
        }
        let w = &self.search.hybrid;
        if w.vector_weight < 0.0 || w.bm25_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "search.hybrid weights must be non-negative".into(),
            ));
        }
        if w.vector_weight + w.bm25_weight <= 0.0 {
            return Err(ConfigError::Invalid(
                "search.hybrid weights must not both be zero".into(),
            ));
        }
        if self.search.recall_top_k == 0 || self.search.rerank_top_k == 0 {
            return Err(ConfigError::Invalid(
                "search.recall_top_k and search.rerank_top_k must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().expect("defaults are valid");
    }

    #[test]
    fn parses_partial_toml() {
        let toml_src = r#"
            [search]
            recall_top_k = 25

            [search.hybrid]
            vector_weight = 0.6
            bm25_weight = 0.4

            [engine]
            host = "search.internal"
            use_ssl = true
        "#;
        let settings: Settings = toml::from_str(toml_src).unwrap();
        assert_eq!(settings.search.recall_top_k, 25);
        assert_eq!(settings.search.rerank_top_k, 5);
        assert!((settings.search.hybrid.vector_weight - 0.6).abs() < f32::EPSILON);
        assert_eq!(settings.engine.base_url(), "https://search.internal:9200");
    }

    #[test]
    fn rejects_zero_dimension() {
        let mut settings = Settings::default();
        settings.models.embedding.dimension = 0;
        assert!(settings.validate().is_err());
    }
}
