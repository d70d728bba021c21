//! Multi-hop reasoning (the "Odysseus" role).
//!
//! Detects query complexity, decomposes complex queries into at most four
//! dependency-ordered sub-queries via the model, executes each through the
//! supplied retriever, and synthesizes one answer with a reasoning trace.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use super::controller::SearchFn;
use crate::config::Settings;
use crate::llm::{LlmClient, LlmRequest};
use crate::types::SearchResult;

const MAX_SUB_QUERIES: usize = 4;

const COMPLEX_PATTERNS: [&str; 11] = [
    "compare",
    "versus",
    "vs",
    "difference between",
    "relationship between",
    "how does",
    "why did",
    "combine",
    "summarize all",
    "across all",
    "before...after",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubQuery {
    pub id: String,
    pub query: String,
    pub purpose: String,
    pub dependencies: Vec<String>,
    pub priority: i64,
    pub estimated_type: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubAnswer {
    pub sub_query: SubQuery,
    #[serde(skip)]
    pub results: Vec<SearchResult>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub confidence: f32,
    pub reasoning_trace: Vec<String>,
    pub sub_query_count: usize,
}

pub struct ReasoningPlanner {
    llm: Arc<LlmClient>,
    model: String,
    timeout: std::time::Duration,
}

impl ReasoningPlanner {
    pub const AGENT_NAME: &'static str = "Odysseus (The Strategist)";

    pub fn new(llm: Arc<LlmClient>, settings: &Settings) -> Self {
        Self {
            llm,
            model: settings.ollama.text_model.name.clone(),
            timeout: settings.ollama.timeout(),
        }
    }

    /// Execute the full plan-and-synthesize flow for a non-simple query.
    pub async fn answer_complex(&self, query: &str, search: SearchFn) -> SynthesizedAnswer {
        let mut trace = Vec::new();

        let complexity = detect_complexity(query);
        trace.push(format!("complexity: {complexity:?}"));

        let sub_queries = if complexity == QueryComplexity::Simple {
            vec![single_sub_query(query)]
        } else {
            self.decompose_query(query).await
        };
        trace.push(format!("decomposed into {} sub-queries", sub_queries.len()));

        let ordered = order_by_dependencies(sub_queries);
        let mut sub_answers: Vec<SubAnswer> = Vec::new();
        for sub_query in ordered {
            trace.push(format!("retrieving: {}", sub_query.query));
            let results = search(sub_query.query.clone(), None, None).await;
            trace.push(format!("  {} results", results.len()));
            sub_answers.push(SubAnswer { sub_query, results });
        }

        let answer = self.synthesize(query, &sub_answers).await;
        let supported = sub_answers.iter().filter(|a| !a.results.is_empty()).count();
        let confidence = if sub_answers.is_empty() {
            0.0
        } else {
            0.4 + 0.5 * supported as f32 / sub_answers.len() as f32
        };

        SynthesizedAnswer {
            answer,
            confidence: confidence.min(1.0),
            reasoning_trace: trace,
            sub_query_count: sub_answers.len(),
        }
    }

    /// Decompose a complex query into at most four sub-queries.
    pub async fn decompose_query(&self, query: &str) -> Vec<SubQuery> {
        let prompt = format!(
            r#"Analyze this complex query and break it down into simpler sub-queries.

QUERY: "{query}"

Identify what information needs to be retrieved to fully answer this. Each sub-query should:
1. Be simple and focused on ONE piece of information
2. Have a clear purpose
3. Indicate dependencies on other sub-queries (if any)

Return JSON:
{{
    "sub_queries": [
        {{
            "id": "sq1",
            "query": "the simplified sub-query",
            "purpose": "what this finds",
            "dependencies": [],
            "priority": 1,
            "type": "document_search|comparison|aggregation|filter"
        }}
    ],
    "requires_synthesis": true
}}

Keep sub-queries to a maximum of {MAX_SUB_QUERIES}. If the query is simple, return just 1 sub-query."#
        );

        let fallback = json!({
            "sub_queries": [{
                "id": "sq1",
                "query": query,
                "purpose": "Find relevant information",
                "dependencies": [],
                "priority": 1,
                "type": "document_search"
            }],
            "requires_synthesis": false
        });

        let value = self
            .llm
            .generate_json(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.3)
                    .max_retries(2)
                    .timeout(self.timeout),
                Some(fallback),
            )
            .await
            .unwrap_or_else(|_| json!({}));

        let mut sub_queries: Vec<SubQuery> = Vec::new();
        if let Some(items) = value["sub_queries"].as_array() {
            for (i, item) in items.iter().take(MAX_SUB_QUERIES).enumerate() {
                sub_queries.push(SubQuery {
                    id: item["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("sq{}", i + 1)),
                    query: item["query"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| query.to_string()),
                    purpose: item["purpose"].as_str().unwrap_or_default().to_string(),
                    dependencies: item["dependencies"]
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default(),
                    priority: item["priority"].as_i64().unwrap_or(i as i64 + 1),
                    estimated_type: item["type"]
                        .as_str()
                        .unwrap_or("document_search")
                        .to_string(),
                });
            }
        }
        if sub_queries.is_empty() {
            sub_queries.push(single_sub_query(query));
        }
        tracing::info!(
            target: "findry::agents",
            count = sub_queries.len(),
            "decomposed query"
        );
        sub_queries
    }

    async fn synthesize(&self, query: &str, sub_answers: &[SubAnswer]) -> String {
        let mut blocks = Vec::new();
        for answer in sub_answers {
            let top: Vec<String> = answer
                .results
                .iter()
                .take(2)
                .map(|r| {
                    format!(
                        "- {}: {}",
                        r.filename,
                        r.detailed_summary.chars().take(300).collect::<String>()
                    )
                })
                .collect();
            blocks.push(format!(
                "Sub-question: {}\nPurpose: {}\nFindings:\n{}",
                answer.sub_query.query,
                answer.sub_query.purpose,
                if top.is_empty() {
                    "- nothing found".to_string()
                } else {
                    top.join("\n")
                }
            ));
        }

        let prompt = format!(
            "Answer the user's question using only the findings below.\n\nQuestion: {query}\n\n{}\n\nWrite a concise, complete answer. If the findings are insufficient, say what is missing.",
            blocks.join("\n\n")
        );

        let fallback =
            "I could not assemble a complete answer from your documents.".to_string();
        match self
            .llm
            .generate(
                LlmRequest::new(&self.model, prompt)
                    .temperature(0.4)
                    .timeout(self.timeout)
                    .fallback(fallback.clone()),
            )
            .await
        {
            Ok(reply) => reply.text,
            Err(_) => fallback,
        }
    }
}

/// Complexity from pattern hits, question marks, and conjunction count.
pub fn detect_complexity(query: &str) -> QueryComplexity {
    let q_lower = query.to_lowercase();
    let pattern_hits = COMPLEX_PATTERNS
        .iter()
        .filter(|p| q_lower.contains(*p))
        .count();
    let question_marks = query.matches('?').count();
    let and_count = q_lower.matches(" and ").count();

    match pattern_hits + question_marks + and_count {
        0 => QueryComplexity::Simple,
        1 | 2 => QueryComplexity::Moderate,
        _ => QueryComplexity::Complex,
    }
}

fn single_sub_query(query: &str) -> SubQuery {
    SubQuery {
        id: "sq1".into(),
        query: query.to_string(),
        purpose: "Main query".into(),
        dependencies: Vec::new(),
        priority: 1,
        estimated_type: "document_search".into(),
    }
}

/// Order by priority, then push any sub-query after its dependencies.
fn order_by_dependencies(mut sub_queries: Vec<SubQuery>) -> Vec<SubQuery> {
    sub_queries.sort_by_key(|sq| sq.priority);

    let mut ordered: Vec<SubQuery> = Vec::with_capacity(sub_queries.len());
    let mut pending = sub_queries;
    // Bounded passes; unresolved dependencies append in priority order.
    for _ in 0..MAX_SUB_QUERIES + 1 {
        let mut made_progress = false;
        let mut still_pending = Vec::new();
        for sub_query in pending {
            let satisfied = sub_query
                .dependencies
                .iter()
                .all(|dep| ordered.iter().any(|o| &o.id == dep));
            if satisfied {
                ordered.push(sub_query);
                made_progress = true;
            } else {
                still_pending.push(sub_query);
            }
        }
        pending = still_pending;
        if pending.is_empty() || !made_progress {
            break;
        }
    }
    ordered.extend(pending);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lookups_are_simple() {
        assert_eq!(detect_complexity("find my resume"), QueryComplexity::Simple);
    }

    #[test]
    fn single_signal_is_moderate() {
        assert_eq!(
            detect_complexity("compare the two contracts"),
            QueryComplexity::Moderate
        );
        assert_eq!(
            detect_complexity("where is the report?"),
            QueryComplexity::Moderate
        );
    }

    #[test]
    fn stacked_signals_are_complex() {
        assert_eq!(
            detect_complexity("compare Q1 and Q2 revenue and explain why did it change?"),
            QueryComplexity::Complex
        );
    }

    #[test]
    fn dependency_ordering_respects_edges() {
        let sub_queries = vec![
            SubQuery {
                id: "sq2".into(),
                query: "b".into(),
                purpose: String::new(),
                dependencies: vec!["sq1".into()],
                priority: 1,
                estimated_type: "document_search".into(),
            },
            SubQuery {
                id: "sq1".into(),
                query: "a".into(),
                purpose: String::new(),
                dependencies: vec![],
                priority: 2,
                estimated_type: "document_search".into(),
            },
        ];
        let ordered = order_by_dependencies(sub_queries);
        let ids: Vec<&str> = ordered.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["sq1", "sq2"]);
    }

    #[test]
    fn cyclic_dependencies_still_terminate() {
        let sub_queries = vec![
            SubQuery {
                id: "sq1".into(),
                query: "a".into(),
                purpose: String::new(),
                dependencies: vec!["sq2".into()],
                priority: 1,
                estimated_type: "document_search".into(),
            },
            SubQuery {
                id: "sq2".into(),
                query: "b".into(),
                purpose: String::new(),
                dependencies: vec!["sq1".into()],
                priority: 2,
                estimated_type: "document_search".into(),
            },
        ];
        let ordered = order_by_dependencies(sub_queries);
        assert_eq!(ordered.len(), 2);
    }
}
