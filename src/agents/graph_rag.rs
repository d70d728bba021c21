//! Knowledge-graph query expansion (the "Apollo" role).

use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::graph::KnowledgeGraph;
use crate::types::SearchResult;

const DEFAULT_MAX_HOPS: usize = 2;
const DEFAULT_MAX_EXPANSION: usize = 10;

#[derive(Clone, Debug, Default, Serialize)]
pub struct GraphExpansion {
    pub original_entities: Vec<String>,
    pub expanded_entities: Vec<String>,
    pub related_documents: Vec<String>,
    /// Matched-entity names in expansion order.
    pub matched_entities: Vec<String>,
    /// Human-readable traversal trace.
    pub expansion_path: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GraphRagResult {
    pub expanded_query: String,
    pub original_query: String,
    pub expansion: GraphExpansion,
    /// Formatted entity context for LLM prompts.
    pub graph_context: String,
    pub confidence: f32,
}

pub struct GraphRagAgent {
    graph: Arc<KnowledgeGraph>,
}

impl GraphRagAgent {
    pub const AGENT_NAME: &'static str = "Apollo (The Illuminated One)";

    pub fn new(graph: Arc<KnowledgeGraph>) -> Self {
        Self { graph }
    }

    /// Expand query entities along graph edges.
    pub fn expand_query(
        &self,
        entities: &[String],
        max_hops: usize,
        max_expansion: usize,
    ) -> GraphExpansion {
        let mut expansion = GraphExpansion {
            original_entities: entities.to_vec(),
            ..Default::default()
        };
        let mut expanded: Vec<String> = entities.to_vec();
        let mut documents: FxHashSet<String> = FxHashSet::default();

        for entity_name in entities {
            for entity in self.graph.find_entities_by_name(entity_name) {
                expansion.matched_entities.push(entity.name.clone());
                expansion
                    .expansion_path
                    .push(format!("matched: {entity_name}"));
                documents.extend(entity.document_ids.iter().cloned());

                for (related, distance, relation) in
                    self.graph.related_entities(&entity.id, max_hops)
                {
                    if expanded.len() >= entities.len() + max_expansion {
                        break;
                    }
                    if !expanded
                        .iter()
                        .any(|e| e.eq_ignore_ascii_case(&related.name))
                    {
                        expanded.push(related.name.clone());
                        documents.extend(related.document_ids.iter().cloned());
                        expansion.expansion_path.push(format!(
                            "expanded: {} -> {} ({relation}, {distance} hop)",
                            entity.name, related.name
                        ));
                    }
                }
            }
        }

        expansion.expanded_entities = expanded;
        expansion.related_documents = documents.into_iter().collect();
        expansion
    }

    /// Compose the expansion with existing search results.
    pub fn enhance_retrieval(
        &self,
        query: &str,
        entities: &[String],
        search_results: &[SearchResult],
    ) -> GraphRagResult {
        let expansion = self.expand_query(entities, DEFAULT_MAX_HOPS, DEFAULT_MAX_EXPANSION);

        let additional: Vec<&String> = expansion
            .expanded_entities
            .iter()
            .filter(|e| !expansion.original_entities.contains(*e))
            .collect();
        let expanded_query = if additional.is_empty() {
            query.to_string()
        } else {
            let related: Vec<&str> = additional.iter().take(5).map(|s| s.as_str()).collect();
            format!("{query} (related: {})", related.join(", "))
        };

        let graph_context = self.format_graph_context(&expansion);
        let confidence = self.confidence(&expansion, search_results);

        if !additional.is_empty() {
            tracing::info!(
                target: "findry::agents",
                added = additional.len(),
                "graph expansion added related entities"
            );
        }

        GraphRagResult {
            expanded_query,
            original_query: query.to_string(),
            expansion,
            graph_context,
            confidence,
        }
    }

    fn format_graph_context(&self, expansion: &GraphExpansion) -> String {
        if expansion.matched_entities.is_empty() {
            return String::new();
        }
        let mut lines = vec!["**Entity Knowledge Graph Context:**".to_string()];
        for name in expansion.matched_entities.iter().take(5) {
            for entity in self.graph.find_entities_by_name(name) {
                let context = self.graph.entity_context(&entity.id);
                lines.push(format!("\n- **{}** ({})", entity.name, entity.entity_type));
                for (relation, target) in context.outgoing.iter().take(3) {
                    lines.push(format!("  -> {relation} -> {target}"));
                }
                for (relation, source) in context.incoming.iter().take(3) {
                    lines.push(format!("  <- {relation} <- {source}"));
                }
            }
        }
        let expanded_count = expansion
            .expansion_path
            .iter()
            .filter(|p| p.starts_with("expanded:"))
            .count();
        if expanded_count > 0 {
            lines.push(format!(
                "\n**Related entities discovered:** {expanded_count}"
            ));
        }
        lines.join("\n")
    }

    /// `0.5 + 0.3 * graph_coverage + 0.2 * doc_overlap`, capped at 1.
    fn confidence(&self, expansion: &GraphExpansion, search_results: &[SearchResult]) -> f32 {
        if expansion.original_entities.is_empty() {
            return 0.5;
        }

        let matched: FxHashSet<&str> = expansion
            .expansion_path
            .iter()
            .filter_map(|p| p.strip_prefix("matched: "))
            .collect();
        let coverage = matched.len() as f32 / expansion.original_entities.len() as f32;

        let result_ids: FxHashSet<&str> = search_results.iter().map(|r| r.id.as_str()).collect();
        let graph_ids: FxHashSet<&str> = expansion
            .related_documents
            .iter()
            .map(String::as_str)
            .collect();
        let overlap = if result_ids.is_empty() || graph_ids.is_empty() {
            0.0
        } else {
            result_ids.intersection(&graph_ids).count() as f32 / result_ids.len() as f32
        };

        (0.5 + coverage.min(1.0) * 0.3 + overlap * 0.2).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePool;

    async fn seeded_graph() -> Arc<KnowledgeGraph> {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let graph = KnowledgeGraph::new(pool).await.unwrap();
        graph
            .add_entity("c_acme", "Acme Corp", "companies", Some("doc-a"))
            .await
            .unwrap();
        graph
            .add_entity("p_jane", "Jane Doe", "persons", Some("doc-b"))
            .await
            .unwrap();
        graph
            .add_entity("proj_harbor", "Harbor", "projects", Some("doc-c"))
            .await
            .unwrap();
        graph
            .add_relationship("p_jane", "c_acme", "works_at", Some("doc-b"))
            .await
            .unwrap();
        graph
            .add_relationship("c_acme", "proj_harbor", "runs", Some("doc-c"))
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn expansion_follows_edges_and_collects_documents() {
        let agent = GraphRagAgent::new(seeded_graph().await);
        let expansion = agent.expand_query(&["Acme Corp".to_string()], 2, 10);
        assert!(expansion
            .expanded_entities
            .iter()
            .any(|e| e == "Jane Doe"));
        assert!(expansion.expanded_entities.iter().any(|e| e == "Harbor"));
        assert!(expansion.related_documents.contains(&"doc-b".to_string()));
        assert!(expansion.related_documents.contains(&"doc-c".to_string()));
    }

    #[tokio::test]
    async fn enhance_appends_related_terms_to_query() {
        let agent = GraphRagAgent::new(seeded_graph().await);
        let result = agent.enhance_retrieval("files about Acme Corp", &["Acme Corp".to_string()], &[]);
        assert!(result.expanded_query.starts_with("files about Acme Corp (related:"));
        assert!(result.graph_context.contains("Acme Corp"));
        assert!(result.confidence >= 0.5 && result.confidence <= 1.0);
    }

    #[tokio::test]
    async fn unmatched_entities_leave_query_unchanged() {
        let agent = GraphRagAgent::new(seeded_graph().await);
        let result = agent.enhance_retrieval("unknown things", &["Nonexistent".to_string()], &[]);
        assert_eq!(result.expanded_query, "unknown things");
        assert!(result.graph_context.is_empty());
    }
}
