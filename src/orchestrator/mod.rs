//! The workflow control plane (the "Zeus" role).
//!
//! One entry point, [`Orchestrator::process_query`], routes each request:
//! queries with resolvable attached documents go to the document pipeline;
//! everything else runs the search pipeline, a fixed state machine over
//! [`WorkflowState`]:
//!
//! ```text
//! load_context -> classify -> route:
//!   clarification       -> clarify -> generate_response
//!   general_knowledge   -> general_answer -> quality_check -> generate_response
//!   comparison|analysis -> document_search -> analyze -> quality_check -> generate_response
//!   summarization       -> document_search -> summarize -> quality_check -> generate_response
//!   document_search     -> document_search -> explain -> quality_check -> generate_response
//! ```
//!
//! Nodes run strictly sequentially; every node boundary emits a step event
//! onto the session's queue. Node failures degrade (recorded on the state)
//! and never abort the workflow.

pub mod document;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::agents::adaptive::strategy_params;
use crate::agents::explainer::EXPLAINED_RESULTS;
use crate::agents::{
    AdaptiveRetriever, AnalysisAgent, ClarificationAgent, ConfidenceScorer, CriticAgent,
    ExplanationAgent, GraphRagAgent, QueryClassifier, QueryComplexity, QueryIntent,
    ReasoningPlanner, RetrievalController, SummarizationAgent, SummaryType,
};
use crate::llm::LlmRequest;
use crate::memory::SessionTurn;
use crate::services::Services;
use crate::steps::StepEvent;
use crate::types::{SearchFilters, SearchResult};

pub use document::{DocumentAnswer, DocumentPipeline};
pub use state::{HistoryMessage, UserPreferences, WorkflowState};

const AGENT_NAME: &str = "Zeus (The Conductor)";

#[derive(Clone, Debug, Default)]
pub struct QueryRequest {
    pub user_id: String,
    pub session_id: String,
    pub query: String,
    pub conversation_id: Option<String>,
    pub attached_documents: Vec<String>,
    pub conversation_history: Vec<HistoryMessage>,
    /// Caller-supplied filters; merged over classifier-extracted ones.
    pub filters: Option<SearchFilters>,
    /// Per-request hybrid leg weights (vector, bm25); overrides learned
    /// preferences and the adaptive strategy.
    pub preferred_weights: Option<(f32, f32)>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub response_message: String,
    pub results: Vec<SearchResult>,
    pub count: usize,
    pub intent: String,
    pub confidence: f32,
    pub steps: Vec<StepEvent>,
    pub search_time: f64,
    pub total_time: f64,
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub routing_path: String,
    pub suggestions: Vec<String>,
    pub clarification_questions: Vec<String>,
    pub document_mode: bool,
}

/// Nodes of the search pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SearchNode {
    LoadContext,
    Classify,
    Clarify,
    GeneralAnswer,
    DocumentSearch,
    Analyze,
    Summarize,
    Explain,
    QualityCheck,
    GenerateResponse,
}

/// The static transition table.
fn next_node(current: SearchNode, state: &WorkflowState) -> Option<SearchNode> {
    use SearchNode::*;
    match current {
        LoadContext => Some(Classify),
        Classify => Some(route_by_intent(state)),
        Clarify => Some(GenerateResponse),
        GeneralAnswer => Some(QualityCheck),
        DocumentSearch => Some(match state.intent {
            Some(QueryIntent::Comparison) | Some(QueryIntent::Analysis) => Analyze,
            Some(QueryIntent::Summarization) => Summarize,
            _ => Explain,
        }),
        Analyze | Summarize | Explain => Some(QualityCheck),
        QualityCheck => Some(GenerateResponse),
        GenerateResponse => None,
    }
}

fn route_by_intent(state: &WorkflowState) -> SearchNode {
    if state.confidence < 0.3 {
        return SearchNode::Clarify;
    }
    match state.intent.unwrap_or(QueryIntent::DocumentSearch) {
        QueryIntent::ClarificationNeeded => SearchNode::Clarify,
        QueryIntent::GeneralKnowledge | QueryIntent::SystemMeta => SearchNode::GeneralAnswer,
        _ => SearchNode::DocumentSearch,
    }
}

fn routing_path(intent: QueryIntent) -> &'static str {
    match intent {
        QueryIntent::DocumentSearch => "Zeus → Athena → Search → Hermes → Diogenes",
        QueryIntent::GeneralKnowledge | QueryIntent::SystemMeta => "Zeus → Athena → LLM → Diogenes",
        QueryIntent::Comparison | QueryIntent::Analysis => {
            "Zeus → Athena → Search → Aristotle → Diogenes"
        }
        QueryIntent::Summarization => "Zeus → Athena → Search → Thoth → Diogenes",
        QueryIntent::ClarificationNeeded => "Zeus → Athena → Socrates",
    }
}

pub struct Orchestrator {
    services: Arc<Services>,
    classifier: QueryClassifier,
    clarifier: ClarificationAgent,
    analyst: AnalysisAgent,
    summarizer: SummarizationAgent,
    explainer: ExplanationAgent,
    critic: Arc<CriticAgent>,
    controller: RetrievalController,
    adaptive: AdaptiveRetriever,
    planner: ReasoningPlanner,
    graph_rag: Option<GraphRagAgent>,
    confidence: ConfidenceScorer,
    documents: DocumentPipeline,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        let settings = &services.settings;
        let llm = Arc::clone(&services.llm);
        let critic = Arc::new(CriticAgent::new(Arc::clone(&llm), settings));
        Self {
            classifier: QueryClassifier::new(Arc::clone(&llm), settings),
            clarifier: ClarificationAgent::new(Arc::clone(&llm), settings),
            analyst: AnalysisAgent::new(Arc::clone(&llm), settings),
            summarizer: SummarizationAgent::new(Arc::clone(&llm), settings),
            explainer: ExplanationAgent::new(Arc::clone(&llm), settings),
            controller: RetrievalController::new(
                Arc::clone(&llm),
                Some(Arc::clone(&critic)),
                settings,
            ),
            adaptive: AdaptiveRetriever::new(Arc::clone(&llm), settings),
            planner: ReasoningPlanner::new(Arc::clone(&llm), settings),
            graph_rag: services.graph.as_ref().map(|g| GraphRagAgent::new(Arc::clone(g))),
            confidence: ConfidenceScorer::new(Arc::clone(&llm), settings),
            documents: DocumentPipeline::new(Arc::clone(&llm), settings),
            critic,
            services,
        }
    }

    /// Entry point for a user query.
    pub async fn process_query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        self.services.steps.ensure_queue(&request.session_id);

        let mut state = WorkflowState::new(
            &request.user_id,
            &request.session_id,
            &request.query,
            request.conversation_id.clone(),
            request.conversation_history.clone(),
        );
        self.emit(
            &mut state,
            AGENT_NAME,
            "Receiving Query",
            format!("Processing: '{}'", clip(&request.query, 50)),
        );

        if !request.attached_documents.is_empty() {
            let mut resolved = Vec::new();
            for document_id in &request.attached_documents {
                if let Some(document) = self.services.retrieval.get_document(document_id).await {
                    resolved.push(document);
                } else {
                    tracing::warn!(
                        target: "findry::orchestrator",
                        document_id,
                        "attached document could not be resolved"
                    );
                }
            }
            if resolved.is_empty() {
                self.emit(
                    &mut state,
                    AGENT_NAME,
                    "Fallback",
                    "No valid documents found - routing to search pipeline".to_string(),
                );
            } else {
                self.emit(
                    &mut state,
                    AGENT_NAME,
                    "Routing to Daedalus",
                    format!(
                        "Documents attached ({}) - activating document pipeline",
                        resolved.len()
                    ),
                );
                return self
                    .run_document_pipeline(request, state, resolved, started)
                    .await;
            }
        }

        self.run_search_pipeline(request, state, started).await
    }

    async fn run_document_pipeline(
        &self,
        request: QueryRequest,
        mut state: WorkflowState,
        documents: Vec<SearchResult>,
        started: Instant,
    ) -> QueryResponse {
        let bus = Arc::clone(&self.services.steps);
        let session_id = state.session_id.clone();
        let answer = self
            .documents
            .process_query(
                &request.query,
                documents,
                &request.conversation_history,
                |event| bus.emit(&session_id, event),
            )
            .await;
        state.steps.extend(answer.steps.clone());

        // Grounding checks on the generated answer.
        let hallucination = self
            .critic
            .detect_hallucination(&request.query, &answer.answer, &answer.sources)
            .await;
        let evidence = self.confidence.assess_evidence(&answer.sources);
        self.emit(
            &mut state,
            CriticAgent::AGENT_NAME,
            "Grounding Check",
            format!(
                "evidence {}; unsupported claims: {}",
                evidence.level,
                hallucination.unsupported_claims.len()
            ),
        );
        if hallucination.has_hallucination {
            tracing::warn!(
                target: "findry::orchestrator",
                claims = hallucination.unsupported_claims.len(),
                "answer contains unsupported claims"
            );
        }

        self.record_interaction(&state, "document_query", &answer.answer, &answer.sources);

        let total_time = started.elapsed().as_secs_f64();
        self.services
            .steps
            .emit(&state.session_id, StepEvent::complete());

        QueryResponse {
            status: "success".into(),
            response_message: answer.answer,
            count: answer.sources.len(),
            results: answer.sources,
            intent: "document_query".into(),
            confidence: answer.confidence,
            steps: state.steps,
            search_time: round2(total_time),
            total_time: round2(total_time),
            session_id: request.session_id,
            user_id: request.user_id,
            conversation_id: request.conversation_id,
            routing_path: "Zeus → Daedalus".into(),
            suggestions: Vec::new(),
            clarification_questions: Vec::new(),
            document_mode: true,
        }
    }

    async fn run_search_pipeline(
        &self,
        request: QueryRequest,
        mut state: WorkflowState,
        started: Instant,
    ) -> QueryResponse {
        state.filters = request.filters.clone();
        if let Some(weights) = request.preferred_weights {
            state.user_preferences = Some(UserPreferences {
                optimal_weights: Some(weights),
            });
        }
        let mut node = Some(SearchNode::LoadContext);
        while let Some(current) = node {
            self.run_node(current, &mut state).await;
            node = next_node(current, &state);
        }

        let intent = state.intent.unwrap_or(QueryIntent::DocumentSearch);
        let confidence = match intent {
            // Generated answers are scored on their own evidence.
            QueryIntent::GeneralKnowledge | QueryIntent::SystemMeta => self.confidence.score_answer(
                &state.response_message,
                &state.query,
                &state.results,
                state.quality.as_ref().map(|q| q.quality_score),
            ),
            _ => match &state.quality {
                Some(quality) => self.critic.calculate_confidence(&state.results, quality),
                None => state.confidence,
            },
        };

        // Low-confidence answers get alternative interpretations; answered
        // searches get suggested follow-ups.
        if confidence < 0.6 {
            let alternatives = self
                .confidence
                .generate_alternatives(&state.query, &state.response_message)
                .await;
            state.suggestions.extend(alternatives);
        } else if !state.results.is_empty() {
            let followups = self
                .confidence
                .suggest_followups(&state.query, &state.response_message, &state.results)
                .await;
            state.suggestions.extend(followups);
        }
        state.suggestions.truncate(5);

        self.record_interaction(
            &state,
            intent.as_str(),
            &state.response_message.clone(),
            &state.results,
        );

        let total_time = started.elapsed().as_secs_f64();
        self.services
            .steps
            .emit(&state.session_id, StepEvent::complete());

        QueryResponse {
            status: if state.error.is_some() {
                "degraded".into()
            } else {
                "success".into()
            },
            response_message: state.response_message.clone(),
            count: state.results.len(),
            results: state.results.clone(),
            intent: intent.as_str().into(),
            confidence,
            steps: state.steps.clone(),
            search_time: round2(state.search_time),
            total_time: round2(total_time),
            session_id: request.session_id,
            user_id: request.user_id,
            conversation_id: request.conversation_id,
            routing_path: routing_path(intent).into(),
            suggestions: state.suggestions.clone(),
            clarification_questions: state.clarification_questions.clone(),
            document_mode: false,
        }
    }

    async fn run_node(&self, node: SearchNode, state: &mut WorkflowState) {
        match node {
            SearchNode::LoadContext => self.load_context(state),
            SearchNode::Classify => self.classify(state).await,
            SearchNode::Clarify => self.clarify(state).await,
            SearchNode::GeneralAnswer => self.general_answer(state).await,
            SearchNode::DocumentSearch => self.document_search(state).await,
            SearchNode::Analyze => self.analyze(state).await,
            SearchNode::Summarize => self.summarize(state).await,
            SearchNode::Explain => self.explain(state).await,
            SearchNode::QualityCheck => self.quality_check(state).await,
            SearchNode::GenerateResponse => self.generate_response(state),
        }
    }

    fn load_context(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            "Memory",
            "Loading Context",
            "Retrieving session history".to_string(),
        );
        let context = self.services.sessions.context(&state.session_id);
        state.session_context = Some(context);
        // Per-user ranking preferences would come from an optional
        // collaborator; request-level overrides are already on the state.
    }

    async fn classify(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            QueryClassifier::AGENT_NAME,
            "Analyzing Intent",
            format!("Query: {}", clip(&state.query, 60)),
        );
        let classification = self
            .classifier
            .classify(&state.query, state.session_context.as_ref())
            .await;

        state.intent = Some(classification.intent);
        state.confidence = classification.confidence;
        state.filters = merge_filters(state.filters.take(), classification.filters.clone());
        state.entities = classification.entities.clone();
        state.clarification_questions = classification.clarification_questions.clone();
        state.resolved_query = classification.resolved_query.clone();

        self.emit(
            state,
            QueryClassifier::AGENT_NAME,
            "Intent Detected",
            format!(
                "{} (confidence: {:.2})",
                classification.intent.as_str(),
                classification.confidence
            ),
        );
    }

    async fn document_search(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            "Search Agent",
            "Searching",
            "Performing hybrid vector + keyword search".to_string(),
        );
        let search_started = Instant::now();
        let mut query = state.effective_query().to_string();

        // Knowledge-graph expansion widens the query when its entities are
        // known to the graph.
        if let Some(graph_rag) = &self.graph_rag
            && !state.entities.is_empty()
        {
            let enhanced = graph_rag.enhance_retrieval(&query, &state.entities, &[]);
            if enhanced.expanded_query != query {
                self.emit(
                    state,
                    GraphRagAgent::AGENT_NAME,
                    "Expanding Query",
                    format!("confidence {:.2}", enhanced.confidence),
                );
                query = enhanced.expanded_query;
            }
        }

        // Leg weights: learned user preferences win, otherwise the adaptive
        // strategy table for this query shape.
        let preferred = state
            .user_preferences
            .as_ref()
            .and_then(|p| p.optimal_weights);
        let weights = match preferred {
            Some(weights) => Some(weights),
            None => {
                let mut decision = self.adaptive.classify_strategy(&query);
                if decision.confidence < 0.5 {
                    // Ambiguous shape: let the model pick the strategy.
                    decision = self.adaptive.classify_strategy_llm(&query).await;
                }
                let params = strategy_params(decision.primary);
                self.emit(
                    state,
                    AdaptiveRetriever::AGENT_NAME,
                    "Strategy Selected",
                    decision.reasoning.clone(),
                );
                Some((params.vector_weight, params.bm25_weight))
            }
        };

        let mut results = self
            .services
            .execute_search(
                &query,
                state.filters.as_ref(),
                Some(&state.user_id),
                weights,
            )
            .await;

        // Thin or weak first passes go through the corrective loop.
        if self.controller.should_use_correction(&query, &results) {
            let bus = Arc::clone(&self.services.steps);
            let session_id = state.session_id.clone();
            let mut loop_steps: Vec<StepEvent> = Vec::new();
            {
                let mut sink = |event: StepEvent| {
                    bus.emit(&session_id, event.clone());
                    loop_steps.push(event);
                };
                let corrected = self
                    .controller
                    .retrieve_with_correction(
                        &query,
                        state.filters.clone(),
                        Some(&state.user_id),
                        self.services.search_fn(),
                        Some(&mut sink),
                    )
                    .await;
                if corrected.final_quality > 0.0 || results.is_empty() {
                    results = corrected.final_results;
                }
            }
            state.steps.extend(loop_steps);
        }

        state.search_time = search_started.elapsed().as_secs_f64();
        state.results = results;
        self.emit(
            state,
            "Search Agent",
            "Results Found",
            format!("{} documents retrieved", state.results.len()),
        );
    }

    async fn general_answer(&self, state: &mut WorkflowState) {
        if !state.conversation_history.is_empty() {
            self.emit(
                state,
                "Memory",
                "Loading Context",
                format!(
                    "Using {} previous messages",
                    state.conversation_history.len()
                ),
            );
        }
        self.emit(
            state,
            "LLM",
            "Generating Answer",
            "Using general knowledge".to_string(),
        );

        let history_block = state.history_block(6);
        let prompt = format!(
            "You are a helpful AI assistant.\n{history_block}User: {}\n\nAssistant:",
            state.query
        );
        let settings = &self.services.settings;
        let reply = self
            .services
            .llm
            .generate(
                LlmRequest::new(&settings.ollama.text_model.name, prompt)
                    .temperature(0.7)
                    .timeout(settings.ollama.timeout())
                    .fallback("I'm having trouble right now. Please try again."),
            )
            .await;

        state.response_message = match reply {
            Ok(reply) => reply.text,
            Err(_) => "Hello! I'm here to help you search your documents.".to_string(),
        };
        state.results = Vec::new();
    }

    async fn clarify(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            ClarificationAgent::AGENT_NAME,
            "Generating Questions",
            "Query was ambiguous".to_string(),
        );
        let ambiguity = self.clarifier.detect_ambiguity(&state.query).await;
        let questions = self
            .clarifier
            .generate_clarifying_questions(&state.query, &ambiguity, 3)
            .await;
        self.emit(
            state,
            ClarificationAgent::AGENT_NAME,
            "Questions Generated",
            format!("{} questions", questions.len()),
        );
        state.clarification_questions = questions;
        state.response_message = "I need some clarification to help you better:".to_string();
    }

    async fn analyze(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            AnalysisAgent::AGENT_NAME,
            "Analyzing Documents",
            "Comparing and extracting insights".to_string(),
        );
        if state.results.len() >= 2 {
            state.comparison = self
                .analyst
                .compare_documents(&state.results[..state.results.len().min(3)])
                .await;
            self.emit(
                state,
                AnalysisAgent::AGENT_NAME,
                "Comparison Complete",
                "Compared top documents".to_string(),
            );
            let query = state.effective_query().to_string();
            state.insights = self.analyst.generate_insights(&state.results, &query).await;
            self.emit(
                state,
                AnalysisAgent::AGENT_NAME,
                "Insights Generated",
                format!("{} insights", state.insights.len()),
            );
        }

        // Analysis queries additionally aggregate figures and look for
        // trends across the result set.
        if state.intent == Some(QueryIntent::Analysis) && !state.results.is_empty() {
            let query = state.effective_query().to_string();
            let aggregates = self.analyst.aggregate_data(&state.results, &query).await;
            state.insights.extend(aggregates);
            let trends = self.analyst.detect_trends(&state.results, &query).await;
            state.insights.extend(trends);
        }

        // Multi-hop reasoning for genuinely complex questions: decompose,
        // retrieve per sub-query, synthesize one answer.
        let query = state.effective_query().to_string();
        if crate::agents::planner::detect_complexity(&query) == QueryComplexity::Complex {
            self.emit(
                state,
                ReasoningPlanner::AGENT_NAME,
                "Planning",
                "Decomposing into sub-queries".to_string(),
            );
            let synthesized = self
                .planner
                .answer_complex(&query, self.services.search_fn())
                .await;
            self.emit(
                state,
                ReasoningPlanner::AGENT_NAME,
                "Synthesis Complete",
                format!("{} sub-queries", synthesized.sub_query_count),
            );
            if !synthesized.answer.is_empty() {
                state.summary = Some(synthesized.answer);
            }
        }
    }

    async fn summarize(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            SummarizationAgent::AGENT_NAME,
            "Summarizing",
            "Generating comprehensive summary".to_string(),
        );
        if !state.results.is_empty() {
            let summary = self
                .summarizer
                .summarize_documents(&state.results, SummaryType::Comprehensive)
                .await;
            if !summary.is_empty() {
                state.summary = Some(summary);
            }
            self.emit(
                state,
                SummarizationAgent::AGENT_NAME,
                "Summary Generated",
                "Created comprehensive summary".to_string(),
            );
        }
    }

    async fn explain(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            ExplanationAgent::AGENT_NAME,
            "Explaining Results",
            "Generating relevance explanations".to_string(),
        );
        let query = state.effective_query().to_string();
        let mut explanations = Vec::new();
        for (rank, document) in state.results.iter().take(EXPLAINED_RESULTS).enumerate() {
            explanations.push(
                self.explainer
                    .explain_ranking(&query, document, rank + 1)
                    .await,
            );
        }
        state.explanations = explanations;
        self.emit(
            state,
            ExplanationAgent::AGENT_NAME,
            "Explanations Ready",
            format!("Explained top {} results", state.explanations.len()),
        );
    }

    async fn quality_check(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            CriticAgent::AGENT_NAME,
            "Reviewing Quality",
            "Checking for relevance".to_string(),
        );
        let query = state.effective_query().to_string();
        let evaluation = self.critic.evaluate_results(&query, &state.results).await;
        state.should_reformulate = evaluation.should_reformulate;
        state.suggestions = self.critic.suggest_improvements(&state.results, &evaluation);
        self.emit(
            state,
            CriticAgent::AGENT_NAME,
            "Quality Check Complete",
            format!("Score: {:.2}", evaluation.quality_score),
        );
        state.quality = Some(evaluation);
    }

    fn generate_response(&self, state: &mut WorkflowState) {
        self.emit(
            state,
            AGENT_NAME,
            "Finalizing",
            "Constructing final response".to_string(),
        );

        if !state.clarification_questions.is_empty() {
            let questions: Vec<String> = state
                .clarification_questions
                .iter()
                .map(|q| format!("• {q}"))
                .collect();
            state.response_message = format!("I need some clarification:\n{}", questions.join("\n"));
            return;
        }
        if !state.response_message.is_empty()
            && matches!(
                state.intent,
                Some(QueryIntent::GeneralKnowledge) | Some(QueryIntent::SystemMeta)
            )
        {
            return;
        }
        if let Some(summary) = &state.summary {
            state.response_message = format!(
                "**Summary of {} documents:**\n\n{summary}",
                state.results.len()
            );
            return;
        }
        if let Some(comparison) = &state.comparison {
            state.response_message = format!(
                "**Comparison of documents:**\n\n**Similarities:** {}\n**Differences:** {}",
                comparison.similarities.join(", "),
                comparison.differences.join(", ")
            );
            return;
        }
        if !state.results.is_empty() {
            let count = state.results.len();
            let plural = if count == 1 { "" } else { "s" };
            state.response_message =
                format!("I found {count} relevant document{plural} for your query.");
        } else {
            state.response_message = format!(
                "I couldn't find any documents matching '{}'. Try different keywords.",
                state.query
            );
        }
    }

    fn record_interaction(
        &self,
        state: &WorkflowState,
        intent: &str,
        response: &str,
        results: &[SearchResult],
    ) {
        let mut document_types: Vec<String> = Vec::new();
        for result in results {
            if !document_types.contains(&result.document_type) {
                document_types.push(result.document_type.clone());
            }
        }
        self.services.sessions.add_turn(
            &state.session_id,
            SessionTurn {
                timestamp: chrono::Utc::now(),
                query: state.query.clone(),
                response: response.chars().take(500).collect(),
                intent: intent.to_string(),
                result_document_types: document_types,
            },
        );
    }

    fn emit(&self, state: &mut WorkflowState, agent: &str, action: &str, details: String) {
        let event = StepEvent::step(agent, action, details);
        tracing::info!(
            target: "findry::orchestrator",
            agent,
            action = %event.action,
            details = %event.details,
            "workflow step"
        );
        self.services.steps.emit(&state.session_id, event.clone());
        state.steps.push(event);
    }
}

/// Merge caller-provided filters over classifier-extracted ones.
pub fn merge_filters(
    explicit: Option<SearchFilters>,
    extracted: Option<SearchFilters>,
) -> Option<SearchFilters> {
    match (explicit, extracted) {
        (Some(mut explicit), Some(extracted)) => {
            explicit.merge(&extracted);
            Some(explicit)
        }
        (Some(filters), None) | (None, Some(filters)) => Some(filters),
        (None, None) => None,
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let clipped: String = text.chars().take(max_chars).collect();
        format!("{clipped}...")
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(intent: QueryIntent, confidence: f32) -> WorkflowState {
        let mut state = WorkflowState::new("u", "s", "q", None, Vec::new());
        state.intent = Some(intent);
        state.confidence = confidence;
        state
    }

    #[test]
    fn transition_table_routes_each_intent_to_its_lane() {
        use SearchNode::*;
        let cases = [
            (QueryIntent::DocumentSearch, Explain),
            (QueryIntent::Comparison, Analyze),
            (QueryIntent::Analysis, Analyze),
            (QueryIntent::Summarization, Summarize),
        ];
        for (intent, expected_specialist) in cases {
            let state = state_with(intent, 0.9);
            assert_eq!(next_node(LoadContext, &state), Some(Classify));
            assert_eq!(next_node(Classify, &state), Some(DocumentSearch));
            assert_eq!(next_node(DocumentSearch, &state), Some(expected_specialist));
            assert_eq!(next_node(expected_specialist, &state), Some(QualityCheck));
            assert_eq!(next_node(QualityCheck, &state), Some(GenerateResponse));
            assert_eq!(next_node(GenerateResponse, &state), None);
        }
    }

    #[test]
    fn general_knowledge_skips_retrieval() {
        let state = state_with(QueryIntent::GeneralKnowledge, 0.9);
        assert_eq!(next_node(SearchNode::Classify, &state), Some(SearchNode::GeneralAnswer));
        assert_eq!(
            next_node(SearchNode::GeneralAnswer, &state),
            Some(SearchNode::QualityCheck)
        );
    }

    #[test]
    fn low_confidence_forces_clarification() {
        let state = state_with(QueryIntent::DocumentSearch, 0.2);
        assert_eq!(next_node(SearchNode::Classify, &state), Some(SearchNode::Clarify));
        assert_eq!(
            next_node(SearchNode::Clarify, &state),
            Some(SearchNode::GenerateResponse)
        );
    }

    #[test]
    fn routing_paths_name_the_lanes() {
        assert!(routing_path(QueryIntent::DocumentSearch).contains("Hermes"));
        assert!(routing_path(QueryIntent::Summarization).contains("Thoth"));
        assert!(routing_path(QueryIntent::ClarificationNeeded).ends_with("Socrates"));
    }

    #[test]
    fn filter_merge_prefers_explicit_fields() {
        let explicit = SearchFilters {
            file_type: Some(vec![".pdf".into()]),
            ..Default::default()
        };
        let extracted = SearchFilters {
            file_type: Some(vec![".png".into()]),
            document_type: Some("report".into()),
            ..Default::default()
        };
        let merged = merge_filters(Some(explicit), Some(extracted)).unwrap();
        assert_eq!(merged.file_type.unwrap(), vec![".pdf"]);
        assert_eq!(merged.document_type.as_deref(), Some("report"));
    }
}
