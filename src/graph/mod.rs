//! Knowledge graph over extracted entities.
//!
//! Entities and relationships are persisted in two sqlite tables and
//! reconstructed in memory as id-keyed adjacency maps; mutations go through
//! this adapter only. Repeated `add_relationship` calls accumulate edge
//! weight rather than duplicating edges, and entity document lists merge on
//! re-ingestion.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph store error: {0}")]
    #[diagnostic(code(findry::graph::store))]
    Store(#[from] sqlx::Error),

    #[error("relationship references unknown entity {0}")]
    #[diagnostic(code(findry::graph::unknown_entity))]
    UnknownEntity(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub properties: Value,
    pub document_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub relation: String,
    pub weight: f32,
    pub document_id: Option<String>,
}

/// Prompt-ready context around one entity.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EntityContext {
    pub entity: Option<Entity>,
    pub outgoing: Vec<(String, String)>,
    pub incoming: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub total_entities: usize,
    pub total_relationships: usize,
}

#[derive(Default)]
struct GraphIndex {
    entities: FxHashMap<String, Entity>,
    by_name: FxHashMap<String, Vec<String>>,
    outgoing: FxHashMap<String, Vec<Relationship>>,
    incoming: FxHashMap<String, Vec<Relationship>>,
    relationship_count: usize,
}

pub struct KnowledgeGraph {
    pool: SqlitePool,
    index: RwLock<GraphIndex>,
}

impl KnowledgeGraph {
    pub async fn new(pool: SqlitePool) -> Result<Arc<Self>, GraphError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                properties_json TEXT NOT NULL DEFAULT '{}',
                document_ids_json TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS relationships (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                type TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                properties_json TEXT NOT NULL DEFAULT '{}',
                document_id TEXT,
                PRIMARY KEY (source_id, target_id, type)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id)")
            .execute(&pool)
            .await?;

        let graph = Arc::new(Self {
            pool,
            index: RwLock::new(GraphIndex::default()),
        });
        graph.load().await?;
        Ok(graph)
    }

    /// Rebuild the in-memory adjacency maps from the tables.
    async fn load(&self) -> Result<(), GraphError> {
        let mut index = GraphIndex::default();

        let rows = sqlx::query("SELECT * FROM entities")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let entity = Entity {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                entity_type: row.try_get("entity_type")?,
                properties: serde_json::from_str(&row.try_get::<String, _>("properties_json")?)
                    .unwrap_or(Value::Null),
                document_ids: serde_json::from_str(
                    &row.try_get::<String, _>("document_ids_json")?,
                )
                .unwrap_or_default(),
                created_at: row
                    .try_get::<String, _>("created_at")?
                    .parse()
                    .unwrap_or_else(|_| Utc::now()),
            };
            index
                .by_name
                .entry(normalize_name(&entity.name))
                .or_default()
                .push(entity.id.clone());
            index.entities.insert(entity.id.clone(), entity);
        }

        let rows = sqlx::query("SELECT * FROM relationships")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let relationship = Relationship {
                source_id: row.try_get("source_id")?,
                target_id: row.try_get("target_id")?,
                relation: row.try_get("type")?,
                weight: row.try_get::<f64, _>("weight")? as f32,
                document_id: row.try_get("document_id")?,
            };
            index
                .outgoing
                .entry(relationship.source_id.clone())
                .or_default()
                .push(relationship.clone());
            index
                .incoming
                .entry(relationship.target_id.clone())
                .or_default()
                .push(relationship);
            index.relationship_count += 1;
        }

        *self.index.write() = index;
        Ok(())
    }

    /// Insert or merge an entity; an existing entity gains the new document
    /// reference.
    pub async fn add_entity(
        &self,
        id: &str,
        name: &str,
        entity_type: &str,
        document_id: Option<&str>,
    ) -> Result<Entity, GraphError> {
        let entity = {
            let mut index = self.index.write();
            match index.entities.get_mut(id) {
                Some(existing) => {
                    if let Some(doc) = document_id
                        && !existing.document_ids.iter().any(|d| d == doc)
                    {
                        existing.document_ids.push(doc.to_string());
                    }
                    existing.clone()
                }
                None => {
                    let entity = Entity {
                        id: id.to_string(),
                        name: name.to_string(),
                        entity_type: entity_type.to_string(),
                        properties: Value::Object(Default::default()),
                        document_ids: document_id.map(str::to_string).into_iter().collect(),
                        created_at: Utc::now(),
                    };
                    index
                        .by_name
                        .entry(normalize_name(name))
                        .or_default()
                        .push(id.to_string());
                    index.entities.insert(id.to_string(), entity.clone());
                    entity
                }
            }
        };

        sqlx::query(
            "INSERT INTO entities (id, name, entity_type, properties_json, document_ids_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET document_ids_json = excluded.document_ids_json",
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(entity.properties.to_string())
        .bind(serde_json::to_string(&entity.document_ids).unwrap_or_else(|_| "[]".into()))
        .bind(entity.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(entity)
    }

    /// Add or strengthen an edge. Both endpoints must exist; a repeated edge
    /// accumulates weight instead of duplicating.
    pub async fn add_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relation: &str,
        document_id: Option<&str>,
    ) -> Result<(), GraphError> {
        let weight = {
            let mut index = self.index.write();
            if !index.entities.contains_key(source_id) {
                return Err(GraphError::UnknownEntity(source_id.to_string()));
            }
            if !index.entities.contains_key(target_id) {
                return Err(GraphError::UnknownEntity(target_id.to_string()));
            }

            let existing = index
                .outgoing
                .entry(source_id.to_string())
                .or_default()
                .iter_mut()
                .find(|r| r.target_id == target_id && r.relation == relation)
                .map(|r| {
                    r.weight += 1.0;
                    r.weight
                });

            match existing {
                Some(weight) => {
                    if let Some(incoming) = index.incoming.get_mut(target_id)
                        && let Some(edge) = incoming
                            .iter_mut()
                            .find(|r| r.source_id == source_id && r.relation == relation)
                    {
                        edge.weight = weight;
                    }
                    weight
                }
                None => {
                    let relationship = Relationship {
                        source_id: source_id.to_string(),
                        target_id: target_id.to_string(),
                        relation: relation.to_string(),
                        weight: 1.0,
                        document_id: document_id.map(str::to_string),
                    };
                    index
                        .outgoing
                        .entry(source_id.to_string())
                        .or_default()
                        .push(relationship.clone());
                    index
                        .incoming
                        .entry(target_id.to_string())
                        .or_default()
                        .push(relationship);
                    index.relationship_count += 1;
                    1.0
                }
            }
        };

        sqlx::query(
            "INSERT INTO relationships (source_id, target_id, type, weight, document_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source_id, target_id, type) DO UPDATE SET weight = ?4",
        )
        .bind(source_id)
        .bind(target_id)
        .bind(relation)
        .bind(weight as f64)
        .bind(document_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn get_entity(&self, id: &str) -> Option<Entity> {
        self.index.read().entities.get(id).cloned()
    }

    pub fn find_entities_by_name(&self, name: &str) -> Vec<Entity> {
        let index = self.index.read();
        index
            .by_name
            .get(&normalize_name(name))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| index.entities.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Breadth-first neighborhood of an entity, following edges in both
    /// directions up to `max_hops`. Returns `(entity, distance, relation)`
    /// triples, nearest first.
    pub fn related_entities(&self, id: &str, max_hops: usize) -> Vec<(Entity, usize, String)> {
        let index = self.index.read();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        visited.insert(id.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((id.to_string(), 0));
        let mut related = Vec::new();

        while let Some((current, distance)) = queue.pop_front() {
            if distance >= max_hops {
                continue;
            }
            let mut neighbors: Vec<(String, String)> = Vec::new();
            if let Some(edges) = index.outgoing.get(&current) {
                neighbors.extend(
                    edges
                        .iter()
                        .map(|r| (r.target_id.clone(), r.relation.clone())),
                );
            }
            if let Some(edges) = index.incoming.get(&current) {
                neighbors.extend(
                    edges
                        .iter()
                        .map(|r| (r.source_id.clone(), r.relation.clone())),
                );
            }
            for (neighbor_id, relation) in neighbors {
                if visited.insert(neighbor_id.clone())
                    && let Some(entity) = index.entities.get(&neighbor_id)
                {
                    related.push((entity.clone(), distance + 1, relation));
                    queue.push_back((neighbor_id, distance + 1));
                }
            }
        }
        related
    }

    pub fn entity_context(&self, id: &str) -> EntityContext {
        let index = self.index.read();
        let entity = index.entities.get(id).cloned();
        let name_of = |entity_id: &str| {
            index
                .entities
                .get(entity_id)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| entity_id.to_string())
        };
        let outgoing = index
            .outgoing
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|r| (r.relation.clone(), name_of(&r.target_id)))
                    .collect()
            })
            .unwrap_or_default();
        let incoming = index
            .incoming
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|r| (r.relation.clone(), name_of(&r.source_id)))
                    .collect()
            })
            .unwrap_or_default();
        EntityContext {
            entity,
            outgoing,
            incoming,
        }
    }

    pub fn stats(&self) -> GraphStats {
        let index = self.index.read();
        GraphStats {
            total_entities: index.entities.len(),
            total_relationships: index.relationship_count,
        }
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
