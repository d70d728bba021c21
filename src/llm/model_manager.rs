//! Model lifecycle tracking for the runtime.
//!
//! The runtime loads models lazily on first use, which makes the first call
//! of a cold model pay the full load latency inside a user request. The
//! manager front-loads that cost with a tiny warmup call, serialized per
//! model name, and optionally unloads other models first to keep VRAM for
//! the active one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::ollama::{GenerateRequest, LanguageModel, LlmError};
use crate::config::ModelManagementSettings;

pub struct ModelManager {
    model: Arc<dyn LanguageModel>,
    loaded: Mutex<FxHashMap<String, Instant>>,
    load_locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    auto_unload: bool,
    keep_both_loaded: bool,
    unload_after: Duration,
    /// When false, ensure_loaded is a no-op (used by tests and by fakes that
    /// have no load cost).
    enabled: bool,
}

impl ModelManager {
    pub fn new(model: Arc<dyn LanguageModel>, settings: &ModelManagementSettings) -> Arc<Self> {
        Arc::new(Self {
            model,
            loaded: Mutex::new(FxHashMap::default()),
            load_locks: Mutex::new(FxHashMap::default()),
            auto_unload: settings.auto_unload,
            keep_both_loaded: settings.keep_both_loaded,
            unload_after: Duration::from_secs(settings.unload_after_seconds),
            enabled: true,
        })
    }

    /// A manager that performs no warmup or tracking.
    pub fn disabled(model: Arc<dyn LanguageModel>) -> Arc<Self> {
        Arc::new(Self {
            model,
            loaded: Mutex::new(FxHashMap::default()),
            load_locks: Mutex::new(FxHashMap::default()),
            auto_unload: false,
            keep_both_loaded: true,
            unload_after: Duration::from_secs(300),
            enabled: false,
        })
    }

    /// Ensure the named model is loaded, warming it up if necessary.
    ///
    /// Safe to call on every request: an already-loaded model only has its
    /// last-used timestamp refreshed.
    pub async fn ensure_loaded(&self, name: &str) -> Result<(), LlmError> {
        if !self.enabled {
            return Ok(());
        }
        if self.touch(name) {
            return Ok(());
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        // Another task may have finished loading while we waited.
        if self.touch(name) {
            return Ok(());
        }

        if self.auto_unload && !self.keep_both_loaded {
            self.unload_others(name);
        }

        tracing::info!(target: "findry::llm", model = name, "loading model");
        self.model
            .generate(GenerateRequest {
                model: name.to_string(),
                prompt: "Hi".into(),
                temperature: 0.0,
                format_json: false,
                think: false,
                images: Vec::new(),
                num_predict: Some(1),
                timeout: Duration::from_secs(60),
            })
            .await?;

        self.loaded.lock().insert(name.to_string(), Instant::now());
        tracing::info!(target: "findry::llm", model = name, "model loaded");
        Ok(())
    }

    /// Drop tracking for models idle beyond the configured threshold.
    pub fn cleanup_inactive(&self) {
        if !self.auto_unload || self.keep_both_loaded {
            return;
        }
        let now = Instant::now();
        let mut loaded = self.loaded.lock();
        loaded.retain(|name, last_used| {
            let keep = now.duration_since(*last_used) <= self.unload_after;
            if !keep {
                tracing::info!(target: "findry::llm", model = name, "unloading inactive model");
            }
            keep
        });
    }

    pub fn loaded_models(&self) -> Vec<String> {
        self.loaded.lock().keys().cloned().collect()
    }

    /// Refresh the last-used timestamp; true when already loaded.
    fn touch(&self, name: &str) -> bool {
        let mut loaded = self.loaded.lock();
        match loaded.get_mut(name) {
            Some(last_used) => {
                *last_used = Instant::now();
                true
            }
            None => false,
        }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.load_locks.lock();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn unload_others(&self, keep: &str) {
        let mut loaded = self.loaded.lock();
        loaded.retain(|name, _| {
            if name != keep {
                tracing::info!(target: "findry::llm", model = name, "unloading to free memory");
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ollama::GenerateResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerateResponse {
                text: "ok".into(),
                thinking: None,
            })
        }
    }

    fn manager(model: Arc<CountingModel>, keep_both: bool) -> Arc<ModelManager> {
        ModelManager::new(
            model,
            &ModelManagementSettings {
                auto_unload: true,
                keep_both_loaded: keep_both,
                unload_after_seconds: 300,
            },
        )
    }

    #[tokio::test]
    async fn warmup_happens_once_per_model() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let manager = manager(model.clone(), true);
        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("a").await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loading_second_model_unloads_first_unless_keeping_both() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let manager = manager(model, false);
        manager.ensure_loaded("a").await.unwrap();
        manager.ensure_loaded("b").await.unwrap();
        assert_eq!(manager.loaded_models(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn disabled_manager_never_calls_the_model() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let manager = ModelManager::disabled(model.clone());
        manager.ensure_loaded("a").await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
