//! The shared workflow state threaded through the orchestrator.

use serde::{Deserialize, Serialize};

use crate::agents::{ComparisonResult, QualityEvaluation, QueryIntent};
use crate::memory::SessionContext;
use crate::steps::StepEvent;
use crate::types::{SearchFilters, SearchResult};

/// One prior message of the conversation, as given to prompt contexts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

/// Per-user ranking preferences loaded at the start of a workflow.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct UserPreferences {
    /// Preferred hybrid weights (vector, bm25) when learned.
    pub optimal_weights: Option<(f32, f32)>,
}

/// The single mutable record a workflow run threads through its nodes.
///
/// Only nodes mutate the state, and nodes run strictly sequentially; there
/// is never concurrent mutation within one workflow.
#[derive(Clone, Debug)]
pub struct WorkflowState {
    pub user_id: String,
    pub session_id: String,
    pub conversation_id: Option<String>,

    /// The query as the user typed it.
    pub query: String,
    /// The query after follow-up resolution, when a rewrite applied.
    pub resolved_query: Option<String>,

    pub intent: Option<QueryIntent>,
    pub confidence: f32,
    pub filters: Option<SearchFilters>,
    pub entities: Vec<String>,

    pub session_context: Option<SessionContext>,
    pub user_preferences: Option<UserPreferences>,
    pub conversation_history: Vec<HistoryMessage>,

    pub results: Vec<SearchResult>,
    pub search_time: f64,

    pub clarification_questions: Vec<String>,
    pub comparison: Option<ComparisonResult>,
    pub summary: Option<String>,
    pub explanations: Vec<String>,
    pub insights: Vec<String>,

    pub quality: Option<QualityEvaluation>,
    pub should_reformulate: bool,

    pub response_message: String,
    pub suggestions: Vec<String>,

    pub error: Option<String>,
    pub steps: Vec<StepEvent>,
}

impl WorkflowState {
    pub fn new(
        user_id: &str,
        session_id: &str,
        query: &str,
        conversation_id: Option<String>,
        conversation_history: Vec<HistoryMessage>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            conversation_id,
            query: query.to_string(),
            resolved_query: None,
            intent: None,
            confidence: 0.0,
            filters: None,
            entities: Vec::new(),
            session_context: None,
            user_preferences: None,
            conversation_history,
            results: Vec::new(),
            search_time: 0.0,
            clarification_questions: Vec::new(),
            comparison: None,
            summary: None,
            explanations: Vec::new(),
            insights: Vec::new(),
            quality: None,
            should_reformulate: false,
            response_message: String::new(),
            suggestions: Vec::new(),
            error: None,
            steps: Vec::new(),
        }
    }

    /// The query the retrieval nodes should use.
    pub fn effective_query(&self) -> &str {
        self.resolved_query.as_deref().unwrap_or(&self.query)
    }

    /// Format up to `max_turns` recent turns for an LLM prompt.
    pub fn history_block(&self, max_turns: usize) -> String {
        if self.conversation_history.is_empty() {
            return String::new();
        }
        let start = self.conversation_history.len().saturating_sub(max_turns);
        let mut lines = Vec::new();
        for message in &self.conversation_history[start..] {
            let role = if message.role == "user" {
                "User"
            } else {
                "Assistant"
            };
            let content: String = message.content.chars().take(500).collect();
            lines.push(format!("{role}: {content}"));
        }
        format!("Previous conversation:\n{}\n\n", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_block_limits_turns_and_length() {
        let history = (0..10)
            .map(|i| HistoryMessage {
                role: if i % 2 == 0 { "user" } else { "assistant" }.into(),
                content: format!("message {i}"),
            })
            .collect();
        let state = WorkflowState::new("u", "s", "q", None, history);
        let block = state.history_block(6);
        assert!(block.starts_with("Previous conversation:"));
        assert!(!block.contains("message 3"));
        assert!(block.contains("message 4"));
        assert!(block.contains("message 9"));
    }

    #[test]
    fn effective_query_prefers_resolution() {
        let mut state = WorkflowState::new("u", "s", "show more", None, Vec::new());
        assert_eq!(state.effective_query(), "show more");
        state.resolved_query = Some("find decks (more results)".into());
        assert_eq!(state.effective_query(), "find decks (more results)");
    }
}
