//! findryd: the findry server binary.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use findry::config::Settings;
use findry::engine::{OpenSearchBackend, RetrievalAdapter, SearchBackend};
use findry::graph::KnowledgeGraph;
use findry::ingest::{FailedIngestionLog, IngestionPipeline, LocalExtractor};
use findry::llm::{
    EmbeddingService, LlmClient, ModelManager, OllamaClient, OllamaEmbedder,
};
use findry::memory::{ConversationStore, SessionMemory};
use findry::orchestrator::Orchestrator;
use findry::rank::{FeedbackStore, HttpCrossEncoder, Reranker};
use findry::server::{AppState, router};
use findry::services::Services;
use findry::steps::StepBus;

#[tokio::main]
async fn main() -> miette::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "findry=info,findryd=info".into()),
        )
        .init();

    let config_path = std::env::args().nth(1);
    let settings = Settings::load(config_path.as_deref().map(Path::new))
        .map_err(|err| miette::miette!("{err}"))?;

    std::fs::create_dir_all(&settings.data.dir)
        .map_err(|err| miette::miette!("cannot create data dir: {err}"))?;

    // Model runtime.
    let ollama = Arc::new(OllamaClient::new(settings.ollama.base_url.clone()));
    let manager = ModelManager::new(ollama.clone(), &settings.model_management);
    let llm = Arc::new(LlmClient::new(ollama, Arc::clone(&manager)));

    // Embedding and reranking seams.
    let embedder = Arc::new(OllamaEmbedder::new(
        settings.models.embedding.base_url.clone(),
        settings.models.embedding.name.clone(),
    ));
    let embeddings = EmbeddingService::new(embedder, settings.models.embedding.dimension);

    // Search engine. Index bootstrap is the only fatal dependency.
    let backend: Arc<dyn SearchBackend> = Arc::new(OpenSearchBackend::new(&settings.engine));
    backend
        .create_index(settings.models.embedding.dimension)
        .await
        .map_err(|err| miette::miette!("index bootstrap failed: {err}"))?;
    let retrieval = Arc::new(RetrievalAdapter::new(
        Arc::clone(&backend),
        &settings.search.hybrid,
    ));

    // Sqlite-backed stores; each is optional beyond this point.
    let feedback = match open_pool(&settings, "feedback.db").await {
        Ok(pool) => match FeedbackStore::new(pool).await {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                tracing::warn!(error = %err, "feedback store unavailable");
                None
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "feedback database unavailable");
            None
        }
    };
    let conversations = match open_pool(&settings, "conversations.db").await {
        Ok(pool) => match ConversationStore::new(pool).await {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                tracing::warn!(error = %err, "conversation store unavailable");
                None
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "conversation database unavailable");
            None
        }
    };
    let graph = match open_pool(&settings, "graph.db").await {
        Ok(pool) => match KnowledgeGraph::new(pool).await {
            Ok(graph) => Some(graph),
            Err(err) => {
                tracing::warn!(error = %err, "knowledge graph unavailable");
                None
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "graph database unavailable");
            None
        }
    };

    let reranker = Arc::new(Reranker::new(
        Arc::new(HttpCrossEncoder::new(&settings.models.cross_encoder)),
        feedback.clone(),
        &settings.models.cross_encoder,
    ));

    let ingestion = Arc::new(IngestionPipeline::new(
        &settings,
        Arc::new(LocalExtractor),
        Arc::clone(&llm),
        Arc::clone(&embeddings),
        Arc::clone(&backend),
        graph.clone(),
        Arc::new(FailedIngestionLog::new(
            settings.data.dir.join("failed_ingestion.json"),
        )),
    ));

    let services = Arc::new(Services {
        steps: StepBus::new(settings.server.step_queue_capacity),
        sessions: Arc::new(SessionMemory::new(&settings.memory)),
        llm,
        retrieval,
        reranker,
        embeddings,
        feedback,
        conversations,
        graph,
        ingestion: Some(ingestion),
        settings: settings.clone(),
    });

    // Periodic housekeeping: idle model unloading, session expiry, old
    // feedback cleanup.
    {
        let services = Arc::clone(&services);
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                ticker.tick().await;
                manager.cleanup_inactive();
                let expired = services.sessions.prune_expired();
                if expired > 0 {
                    tracing::debug!(expired, "pruned idle sessions");
                }
                if let Some(feedback) = &services.feedback {
                    let _ = feedback.cleanup_old(findry::rank::feedback::RETENTION_DAYS).await;
                }
            }
        });
    }

    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&services)));
    let app = router(AppState {
        services: Arc::clone(&services),
        orchestrator,
    });

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .map_err(|err| miette::miette!("cannot bind {}: {err}", settings.server.bind))?;
    tracing::info!(bind = %settings.server.bind, "findryd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .map_err(|err| miette::miette!("server error: {err}"))?;

    Ok(())
}

async fn open_pool(settings: &Settings, file: &str) -> Result<sqlx::SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(settings.data.dir.join(file))
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}
