//! HTTP surface: search, step streaming, feedback, conversations.
//!
//! Handlers always answer 200 with a human-readable message and a (possibly
//! empty) results array; failures are reported in-band. The step stream is
//! plain SSE: one JSON object per `data:` frame, terminated by a
//! `complete` event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router};
use axum::routing::{delete, get, post};
use futures_util::Stream;
use futures_util::stream;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::memory::MessageRole;
use crate::orchestrator::{HistoryMessage, Orchestrator, QueryRequest};
use crate::services::Services;
use crate::types::SearchFilters;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/search/enhanced", post(search_enhanced))
        .route("/search/enhanced/stream/{session_id}", get(stream_steps))
        .route("/index", post(index_directory))
        .route("/index/remove", post(remove_indexed_file))
        .route("/search/explain", post(explain_ranking))
        .route("/feedback", post(submit_feedback))
        .route("/feedback/stats/{user_id}", get(feedback_stats))
        .route(
            "/feedback/document/{user_id}/{document_id}",
            get(document_feedback),
        )
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/{id}/messages", get(conversation_messages))
        .route("/conversations/{id}/pin", post(pin_conversation))
        .route("/conversations/{id}/rename", post(rename_conversation))
        .route("/sessions/{session_id}", delete(clear_session))
        .route("/conversations/{id}/documents", post(attach_documents))
        .route(
            "/conversations/{id}/documents/{document_id}",
            delete(detach_document),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let count = state
        .services
        .retrieval
        .backend()
        .count()
        .await
        .unwrap_or(0);
    let graph = state
        .services
        .graph
        .as_ref()
        .map(|g| g.stats())
        .unwrap_or_default();
    Json(json!({
        "count": count,
        "graph_entities": graph.total_entities,
        "graph_relationships": graph.total_relationships,
        "dropped_steps": state.services.steps.dropped(),
    }))
}

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    /// `false` collapses ranking to the vector leg only.
    #[serde(default)]
    use_hybrid: Option<bool>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    attached_documents: Vec<String>,
    #[serde(default)]
    filters: Option<SearchFilters>,
}

async fn search_enhanced(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Json<Value> {
    let session_id = body
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user_id = body.user_id.unwrap_or_else(|| "default".to_string());

    // Prior conversation turns feed the prompt contexts.
    let mut history = Vec::new();
    if let (Some(conversation_id), Some(store)) =
        (&body.conversation_id, &state.services.conversations)
        && let Ok(messages) = store.messages(conversation_id, Some(12)).await
    {
        history = messages
            .into_iter()
            .map(|m| HistoryMessage {
                role: match m.role {
                    MessageRole::User => "user".to_string(),
                    MessageRole::Assistant => "assistant".to_string(),
                },
                content: m.content,
            })
            .collect();
    }

    let request = QueryRequest {
        user_id: user_id.clone(),
        session_id: session_id.clone(),
        query: body.query.clone(),
        conversation_id: body.conversation_id.clone(),
        attached_documents: body.attached_documents.clone(),
        conversation_history: history,
        filters: body.filters.clone(),
        preferred_weights: match body.use_hybrid {
            Some(false) => Some((1.0, 0.0)),
            _ => None,
        },
    };
    let mut response = state.orchestrator.process_query(request).await;
    if let Some(top_k) = body.top_k {
        response.results.truncate(top_k);
        response.count = response.results.len();
    }

    if let (Some(conversation_id), Some(store)) =
        (&body.conversation_id, &state.services.conversations)
    {
        let results = serde_json::to_value(&response.results).unwrap_or(Value::Null);
        let steps = serde_json::to_value(&response.steps).unwrap_or(Value::Null);
        let _ = store
            .add_message(
                conversation_id,
                MessageRole::User,
                &body.query,
                Some(&body.query),
                None,
                None,
            )
            .await;
        let _ = store
            .add_message(
                conversation_id,
                MessageRole::Assistant,
                &response.response_message,
                None,
                Some(&results),
                Some(&steps),
            )
            .await;
    }

    Json(serde_json::to_value(&response).unwrap_or_else(|_| {
        json!({
            "status": "error",
            "response_message": "Failed to encode response.",
            "results": [],
        })
    }))
}

async fn stream_steps(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let timeout = Duration::from_secs(state.services.settings.server.stream_timeout_secs);
    let steps = state.services.steps.stream(&session_id, timeout);

    let stream = stream::unfold(steps, |mut steps| async move {
        let event = steps.next().await?;
        let frame = Event::default().data(event.to_json_value().to_string());
        Some((Ok(frame), steps))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct ExplainBody {
    query: String,
    document_id: String,
}

/// Decompose one document's ranking for a query: raw and normalized
/// cross-encoder scores, matching terms, and a readable sentence.
async fn explain_ranking(
    State(state): State<AppState>,
    Json(body): Json<ExplainBody>,
) -> Json<Value> {
    let Some(document) = state.services.retrieval.get_document(&body.document_id).await else {
        return Json(json!({
            "status": "not_found",
            "message": format!("Document {} is not indexed.", body.document_id),
        }));
    };
    match state
        .services
        .reranker
        .explain_ranking(&body.query, &document)
        .await
    {
        Ok(explanation) => Json(json!({
            "status": "success",
            "explanation": serde_json::to_value(&explanation).unwrap_or(Value::Null),
            "score_components": crate::agents::explainer::explain_score_components(&document),
            "highlights": crate::agents::explainer::highlight_matches(&body.query, &document),
        })),
        Err(err) => Json(json!({ "status": "error", "message": err.to_string() })),
    }
}

#[derive(Deserialize)]
struct IndexBody {
    directory: String,
}

/// Start a background directory ingestion. Progress is streamed as step
/// events under the returned task id, consumable through the same SSE
/// endpoint as search steps.
async fn index_directory(
    State(state): State<AppState>,
    Json(body): Json<IndexBody>,
) -> Json<Value> {
    let Some(pipeline) = state.services.ingestion.clone() else {
        return Json(json!({ "status": "unavailable", "message": "Ingestion is not enabled." }));
    };

    let task_id = format!("ingest-{}", uuid::Uuid::new_v4());
    let bus = Arc::clone(&state.services.steps);
    bus.ensure_queue(&task_id);

    let directory = std::path::PathBuf::from(body.directory);
    let progress_bus = Arc::clone(&bus);
    let progress_task = task_id.clone();
    let stream_task = task_id.clone();
    tokio::spawn(async move {
        let progress: crate::ingest::ProgressCallback = Arc::new(move |update| {
            progress_bus.emit(
                &progress_task,
                crate::steps::StepEvent::step(
                    "Ingestion",
                    format!("{}/{}", update.processed, update.total),
                    update.current_file,
                ),
            );
        });
        let outcomes = pipeline.process_directory(&directory, Some(progress)).await;
        let succeeded = outcomes
            .iter()
            .filter(|o| matches!(o, crate::ingest::IngestOutcome::Success { .. }))
            .count();
        bus.emit(
            &stream_task,
            crate::steps::StepEvent::step(
                "Ingestion",
                "Finished",
                format!("{succeeded}/{} files indexed", outcomes.len()),
            ),
        );
        bus.emit(&stream_task, crate::steps::StepEvent::complete());
    });

    Json(json!({ "status": "started", "task_id": task_id }))
}

#[derive(Deserialize)]
struct RemoveBody {
    path: String,
}

/// File-deletion signal from the watcher: drop the record for this path.
async fn remove_indexed_file(
    State(state): State<AppState>,
    Json(body): Json<RemoveBody>,
) -> Json<Value> {
    let Some(pipeline) = &state.services.ingestion else {
        return Json(json!({ "status": "unavailable" }));
    };
    pipeline
        .remove_file(std::path::Path::new(&body.path))
        .await;
    Json(json!({ "status": "success" }))
}

#[derive(Deserialize)]
struct FeedbackBody {
    user_id: String,
    query: String,
    document_id: String,
    is_helpful: bool,
}

async fn submit_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackBody>,
) -> Json<Value> {
    let Some(store) = &state.services.feedback else {
        return Json(json!({
            "status": "unavailable",
            "message": "Feedback is not enabled.",
        }));
    };
    let feedback_type = if body.is_helpful {
        "helpful"
    } else {
        "not helpful"
    };
    match store
        .add_feedback(&body.user_id, &body.query, &body.document_id, body.is_helpful)
        .await
    {
        Ok(()) => Json(json!({
            "status": "success",
            "message": format!("Thanks for your feedback! Marked as {feedback_type}."),
            "feedback_type": feedback_type,
        })),
        Err(err) => Json(json!({
            "status": "error",
            "message": format!("Failed to save feedback: {err}"),
        })),
    }
}

async fn feedback_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Value> {
    let Some(store) = &state.services.feedback else {
        return Json(json!({ "total_feedback": 0, "positive": 0, "negative": 0 }));
    };
    match store.user_stats(&user_id).await {
        Ok(stats) => Json(json!({
            "total_feedback": stats.total,
            "positive": stats.positive,
            "negative": stats.negative,
        })),
        Err(_) => Json(json!({ "total_feedback": 0, "positive": 0, "negative": 0 })),
    }
}

async fn document_feedback(
    State(state): State<AppState>,
    Path((user_id, document_id)): Path<(String, String)>,
) -> Json<Value> {
    let score = match &state.services.feedback {
        Some(store) => store
            .document_feedback(&user_id, &document_id)
            .await
            .unwrap_or(None),
        None => None,
    };
    Json(json!({ "document_id": document_id, "feedback": score }))
}

#[derive(Deserialize)]
struct ListQuery {
    user_id: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let Some(store) = &state.services.conversations else {
        return Json(json!({ "conversations": [] }));
    };
    match store.list(&query.user_id, query.limit).await {
        Ok(conversations) => {
            let now = chrono::Utc::now();
            let listed: Vec<Value> = conversations
                .iter()
                .map(|c| {
                    let mut value = serde_json::to_value(c).unwrap_or(Value::Null);
                    if let Some(object) = value.as_object_mut() {
                        object.insert(
                            "bucket".into(),
                            json!(crate::memory::conversations::recency_bucket(
                                c.updated_at,
                                now
                            )),
                        );
                    }
                    value
                })
                .collect();
            Json(json!({ "conversations": listed }))
        }
        Err(_) => Json(json!({ "conversations": [] })),
    }
}

#[derive(Deserialize)]
struct CreateConversationBody {
    user_id: String,
    first_query: String,
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationBody>,
) -> Json<Value> {
    let Some(store) = &state.services.conversations else {
        return Json(json!({ "status": "unavailable" }));
    };
    match store.create(&body.user_id, &body.first_query).await {
        Ok(conversation) => Json(json!({
            "status": "success",
            "conversation": serde_json::to_value(&conversation).unwrap_or(Value::Null),
        })),
        Err(err) => Json(json!({ "status": "error", "message": err.to_string() })),
    }
}

async fn get_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let Some(store) = &state.services.conversations else {
        return Json(json!({ "conversation": null }));
    };
    let conversation = store.get(&id).await.ok().flatten();
    Json(json!({
        "conversation": conversation
            .map(|c| serde_json::to_value(&c).unwrap_or(Value::Null))
            .unwrap_or(Value::Null)
    }))
}

async fn delete_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    if let Some(store) = &state.services.conversations {
        match store.delete(&id).await {
            Ok(()) => return Json(json!({ "status": "success" })),
            Err(err) => return Json(json!({ "status": "error", "message": err.to_string() })),
        }
    }
    Json(json!({ "status": "unavailable" }))
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    let Some(store) = &state.services.conversations else {
        return Json(json!({ "messages": [] }));
    };
    match store.messages(&id, None).await {
        Ok(messages) => Json(json!({
            "messages": serde_json::to_value(&messages).unwrap_or(Value::Null)
        })),
        Err(_) => Json(json!({ "messages": [] })),
    }
}

#[derive(Deserialize)]
struct PinBody {
    pinned: bool,
}

async fn pin_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PinBody>,
) -> Json<Value> {
    if let Some(store) = &state.services.conversations {
        match store.set_pinned(&id, body.pinned).await {
            Ok(()) => return Json(json!({ "status": "success", "pinned": body.pinned })),
            Err(err) => return Json(json!({ "status": "error", "message": err.to_string() })),
        }
    }
    Json(json!({ "status": "unavailable" }))
}

#[derive(Deserialize)]
struct RenameBody {
    title: String,
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Json<Value> {
    if let Some(store) = &state.services.conversations {
        match store.rename(&id, &body.title).await {
            Ok(()) => return Json(json!({ "status": "success" })),
            Err(err) => return Json(json!({ "status": "error", "message": err.to_string() })),
        }
    }
    Json(json!({ "status": "unavailable" }))
}

async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    state.services.sessions.clear(&session_id);
    state.services.steps.remove(&session_id);
    Json(json!({ "status": "success" }))
}

#[derive(Deserialize)]
struct AttachBody {
    document_ids: Vec<String>,
}

async fn attach_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AttachBody>,
) -> Json<Value> {
    if let Some(store) = &state.services.conversations {
        match store.attach_documents(&id, &body.document_ids).await {
            Ok(()) => {
                let attached = store.attached_documents(&id).await.unwrap_or_default();
                return Json(json!({ "status": "success", "attached": attached }));
            }
            Err(err) => return Json(json!({ "status": "error", "message": err.to_string() })),
        }
    }
    Json(json!({ "status": "unavailable" }))
}

async fn detach_document(
    State(state): State<AppState>,
    Path((id, document_id)): Path<(String, String)>,
) -> Json<Value> {
    if let Some(store) = &state.services.conversations {
        match store.detach_document(&id, &document_id).await {
            Ok(()) => return Json(json!({ "status": "success" })),
            Err(err) => return Json(json!({ "status": "error", "message": err.to_string() })),
        }
    }
    Json(json!({ "status": "unavailable" }))
}
