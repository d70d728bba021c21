//! Rolling per-session context with idle expiry.
//!
//! Keeps the last N turns per session in memory and derives a lightweight
//! context view from them: recent queries, dominant topic terms, seen
//! document types, and observed intents. Sessions idle past the TTL are
//! pruned lazily on access.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::MemorySettings;

#[derive(Clone, Debug, Serialize)]
pub struct SessionTurn {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub response: String,
    pub intent: String,
    pub result_document_types: Vec<String>,
}

/// Derived view over the recent turns of one session.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionContext {
    pub recent_queries: Vec<String>,
    pub topic: Option<String>,
    pub document_types: Vec<String>,
    pub intents: Vec<String>,
}

impl SessionContext {
    pub fn last_query(&self) -> Option<&str> {
        self.recent_queries.last().map(String::as_str)
    }
}

struct SessionEntry {
    turns: VecDeque<SessionTurn>,
    touched: Instant,
}

pub struct SessionMemory {
    sessions: Mutex<FxHashMap<String, SessionEntry>>,
    window: usize,
    ttl: Duration,
}

impl SessionMemory {
    pub fn new(settings: &MemorySettings) -> Self {
        Self {
            sessions: Mutex::new(FxHashMap::default()),
            window: settings.session_window.max(1),
            ttl: Duration::from_secs(settings.session_ttl_secs),
        }
    }

    pub fn add_turn(&self, session_id: &str, turn: SessionTurn) {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                turns: VecDeque::new(),
                touched: Instant::now(),
            });
        entry.touched = Instant::now();
        entry.turns.push_back(turn);
        while entry.turns.len() > self.window {
            entry.turns.pop_front();
        }
    }

    /// Context over the last five turns; empty for unknown or expired
    /// sessions.
    pub fn context(&self, session_id: &str) -> SessionContext {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get(session_id) else {
            return SessionContext::default();
        };
        if entry.touched.elapsed() > self.ttl {
            sessions.remove(session_id);
            return SessionContext::default();
        }

        let recent: Vec<&SessionTurn> = entry.turns.iter().rev().take(5).collect();
        let recent: Vec<&SessionTurn> = recent.into_iter().rev().collect();

        let recent_queries: Vec<String> = recent.iter().map(|t| t.query.clone()).collect();

        // Dominant topic: the three most common >3-char terms across the
        // recent queries.
        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for query in &recent_queries {
            for word in query.to_lowercase().split_whitespace() {
                if word.len() > 3 {
                    *counts.entry(word.to_string()).or_insert(0) += 1;
                }
            }
        }
        let mut terms: Vec<(String, usize)> = counts.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let topic = if terms.is_empty() {
            None
        } else {
            Some(
                terms
                    .iter()
                    .take(3)
                    .map(|(w, _)| w.clone())
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        };

        let mut document_types: Vec<String> = Vec::new();
        let mut intents: Vec<String> = Vec::new();
        for turn in &recent {
            for doc_type in &turn.result_document_types {
                if !document_types.contains(doc_type) {
                    document_types.push(doc_type.clone());
                }
            }
            if !intents.contains(&turn.intent) {
                intents.push(turn.intent.clone());
            }
        }

        SessionContext {
            recent_queries,
            topic,
            document_types,
            intents,
        }
    }

    pub fn clear(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Remove every session idle past the TTL. Returns sessions dropped.
    pub fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.touched.elapsed() <= self.ttl);
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(window: usize, ttl_secs: u64) -> SessionMemory {
        SessionMemory::new(&MemorySettings {
            session_window: window,
            session_ttl_secs: ttl_secs,
        })
    }

    fn turn(query: &str, intent: &str) -> SessionTurn {
        SessionTurn {
            timestamp: Utc::now(),
            query: query.into(),
            response: String::new(),
            intent: intent.into(),
            result_document_types: vec!["report".into()],
        }
    }

    #[test]
    fn window_drops_oldest_turns() {
        let memory = memory(2, 3600);
        memory.add_turn("s", turn("first", "document_search"));
        memory.add_turn("s", turn("second", "document_search"));
        memory.add_turn("s", turn("third", "document_search"));
        let context = memory.context("s");
        assert_eq!(context.recent_queries, vec!["second", "third"]);
    }

    #[test]
    fn context_derives_topic_and_intents() {
        let memory = memory(10, 3600);
        memory.add_turn("s", turn("find marketing decks", "document_search"));
        memory.add_turn("s", turn("more marketing plans", "document_search"));
        let context = memory.context("s");
        assert!(context.topic.as_deref().unwrap().contains("marketing"));
        assert_eq!(context.intents, vec!["document_search"]);
        assert_eq!(context.document_types, vec!["report"]);
        assert_eq!(context.last_query(), Some("more marketing plans"));
    }

    #[test]
    fn unknown_session_yields_empty_context() {
        let memory = memory(10, 3600);
        let context = memory.context("nope");
        assert!(context.recent_queries.is_empty());
        assert!(context.topic.is_none());
    }

    #[test]
    fn expired_sessions_are_pruned() {
        let memory = memory(10, 0);
        memory.add_turn("s", turn("q", "document_search"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(memory.context("s").recent_queries.is_empty());
        assert_eq!(memory.prune_expired(), 0);
    }
}
