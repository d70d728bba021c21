//! Per-user relevance feedback with time decay.
//!
//! Each thumbs-up/down is an upsert on `(user_id, normalized_query,
//! document_id)`. At ranking time the store produces per-document boosts in
//! [-1, 1]: each record inside the decay window contributes its score scaled
//! by a linear decay, records whose query exactly matches the current query
//! contribute an extra half weight, and the final map is normalized when any
//! absolute boost exceeds 1. Feedback is strictly per-user; one user's
//! ratings never influence another's ranking.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;

use super::RankError;

/// Days after which a feedback record stops contributing.
pub const DEFAULT_DECAY_DAYS: i64 = 30;
/// Retention horizon for `cleanup_old`.
pub const RETENTION_DAYS: i64 = 90;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedbackStats {
    pub total: i64,
    pub positive: i64,
    pub negative: i64,
}

pub struct FeedbackStore {
    pool: SqlitePool,
}

impl FeedbackStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, RankError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                query TEXT NOT NULL,
                document_id TEXT NOT NULL,
                feedback_score INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feedback_user_query ON feedback(user_id, query)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feedback_user_doc ON feedback(user_id, document_id)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Record feedback; replaces any prior entry for the same
    /// `(user, query, document)` and refreshes its timestamp.
    pub async fn add_feedback(
        &self,
        user_id: &str,
        query: &str,
        document_id: &str,
        is_helpful: bool,
    ) -> Result<(), RankError> {
        let normalized = normalize_query(query);
        let score: i64 = if is_helpful { 1 } else { -1 };
        let now = Utc::now().to_rfc3339();

        let existing = sqlx::query(
            "SELECT id FROM feedback WHERE user_id = ?1 AND query = ?2 AND document_id = ?3",
        )
        .bind(user_id)
        .bind(&normalized)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                sqlx::query("UPDATE feedback SET feedback_score = ?1, created_at = ?2 WHERE id = ?3")
                    .bind(score)
                    .bind(&now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO feedback (user_id, query, document_id, feedback_score, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(user_id)
                .bind(&normalized)
                .bind(document_id)
                .bind(score)
                .bind(&now)
                .execute(&self.pool)
                .await?;
            }
        }
        tracing::debug!(
            target: "findry::rank",
            user_id,
            document_id,
            score,
            "feedback recorded"
        );
        Ok(())
    }

    /// Boosts for the given documents at the current instant.
    pub async fn get_boosts(
        &self,
        user_id: &str,
        query: &str,
        document_ids: &[String],
    ) -> Result<FxHashMap<String, f32>, RankError> {
        self.boosts_at(user_id, query, document_ids, DEFAULT_DECAY_DAYS, Utc::now())
            .await
    }

    /// Boosts evaluated at an explicit instant (tests control the clock).
    pub async fn boosts_at(
        &self,
        user_id: &str,
        query: &str,
        document_ids: &[String],
        decay_days: i64,
        now: DateTime<Utc>,
    ) -> Result<FxHashMap<String, f32>, RankError> {
        let mut boosts: FxHashMap<String, f32> = document_ids
            .iter()
            .map(|id| (id.clone(), 0.0_f32))
            .collect();
        if document_ids.is_empty() {
            return Ok(boosts);
        }

        let normalized = normalize_query(query);
        let cutoff = (now - chrono::Duration::days(decay_days)).to_rfc3339();

        let rows = sqlx::query(
            "SELECT document_id, query, feedback_score, created_at
             FROM feedback
             WHERE user_id = ?1 AND created_at > ?2",
        )
        .bind(user_id)
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let document_id: String = row.try_get("document_id")?;
            if !boosts.contains_key(&document_id) {
                continue;
            }
            let score: i64 = row.try_get("feedback_score")?;
            let created_at: String = row.try_get("created_at")?;
            let Ok(created_at) = DateTime::parse_from_rfc3339(&created_at) else {
                continue;
            };

            let age_days = (now - created_at.with_timezone(&Utc)).num_days();
            let decay = (1.0 - age_days as f32 / decay_days as f32).max(0.0);
            let mut contribution = score as f32 * decay;

            let record_query: String = row.try_get("query")?;
            if record_query == normalized {
                contribution += score as f32 * decay * 0.5;
            }

            *boosts.get_mut(&document_id).unwrap() += contribution;
        }

        let max_abs = boosts.values().fold(0.0_f32, |acc, b| acc.max(b.abs()));
        if max_abs > 1.0 {
            for boost in boosts.values_mut() {
                *boost /= max_abs;
            }
        }
        Ok(boosts)
    }

    pub async fn user_stats(&self, user_id: &str) -> Result<FeedbackStats, RankError> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN feedback_score > 0 THEN 1 ELSE 0 END) AS positive,
                SUM(CASE WHEN feedback_score < 0 THEN 1 ELSE 0 END) AS negative
             FROM feedback WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(FeedbackStats {
            total: row.try_get::<i64, _>("total").unwrap_or(0),
            positive: row.try_get::<Option<i64>, _>("positive")?.unwrap_or(0),
            negative: row.try_get::<Option<i64>, _>("negative")?.unwrap_or(0),
        })
    }

    /// Latest feedback score (+1/-1) a user gave a document, if any.
    pub async fn document_feedback(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<Option<i64>, RankError> {
        let row = sqlx::query(
            "SELECT feedback_score FROM feedback
             WHERE user_id = ?1 AND document_id = ?2
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("feedback_score")?),
            None => None,
        })
    }

    /// Drop records older than the retention horizon. Returns rows removed.
    pub async fn cleanup_old(&self, days: i64) -> Result<u64, RankError> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM feedback WHERE created_at < ?1")
            .bind(&cutoff)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(target: "findry::rank", deleted, "cleaned up old feedback");
        }
        Ok(deleted)
    }
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> FeedbackStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        FeedbackStore::new(pool).await.unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn upsert_replaces_prior_feedback() {
        let store = store().await;
        store.add_feedback("u1", "Budget", "d1", true).await.unwrap();
        store
            .add_feedback("u1", "budget ", "d1", false)
            .await
            .unwrap();
        let stats = store.user_stats("u1").await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.negative, 1);
        assert_eq!(store.document_feedback("u1", "d1").await.unwrap(), Some(-1));
    }

    #[tokio::test]
    async fn fresh_positive_feedback_with_matching_query_boosts_more() {
        let store = store().await;
        store
            .add_feedback("u1", "quarterly report", "d1", true)
            .await
            .unwrap();
        store
            .add_feedback("u1", "something else", "d2", true)
            .await
            .unwrap();

        let boosts = store
            .get_boosts("u1", "quarterly report", &ids(&["d1", "d2"]))
            .await
            .unwrap();
        // Exact query reuse earns the extra half weight.
        assert!(boosts["d1"] > boosts["d2"]);
        assert!(boosts["d1"] > 0.0 && boosts["d2"] > 0.0);
    }

    #[tokio::test]
    async fn boosts_are_normalized_into_unit_range() {
        let store = store().await;
        store.add_feedback("u1", "q", "d1", true).await.unwrap();
        let boosts = store.get_boosts("u1", "q", &ids(&["d1"])).await.unwrap();
        assert!(boosts["d1"].abs() <= 1.0);
    }

    #[tokio::test]
    async fn feedback_is_scoped_per_user() {
        let store = store().await;
        store.add_feedback("u1", "q", "d1", true).await.unwrap();
        let boosts = store.get_boosts("u2", "q", &ids(&["d1"])).await.unwrap();
        assert_eq!(boosts["d1"], 0.0);
    }

    #[tokio::test]
    async fn decay_window_excludes_old_records() {
        let store = store().await;
        store.add_feedback("u1", "q", "d1", true).await.unwrap();
        // Evaluate 40 days in the future: outside the 30-day window.
        let later = Utc::now() + chrono::Duration::days(40);
        let boosts = store
            .boosts_at("u1", "q", &ids(&["d1"]), DEFAULT_DECAY_DAYS, later)
            .await
            .unwrap();
        assert_eq!(boosts["d1"], 0.0);
    }

    #[tokio::test]
    async fn partial_decay_reduces_contribution() {
        let store = store().await;
        store.add_feedback("u1", "other", "d1", true).await.unwrap();
        let fresh = store
            .boosts_at("u1", "q", &ids(&["d1"]), DEFAULT_DECAY_DAYS, Utc::now())
            .await
            .unwrap();
        let aged = store
            .boosts_at(
                "u1",
                "q",
                &ids(&["d1"]),
                DEFAULT_DECAY_DAYS,
                Utc::now() + chrono::Duration::days(15),
            )
            .await
            .unwrap();
        assert!(aged["d1"] < fresh["d1"]);
        assert!(aged["d1"] > 0.0);
    }
}
