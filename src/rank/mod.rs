//! Second-stage ranking: cross-encoder reranking and per-user feedback.

pub mod feedback;
pub mod reranker;

use miette::Diagnostic;
use thiserror::Error;

pub use feedback::{FeedbackStats, FeedbackStore};
pub use reranker::{CrossEncoder, HttpCrossEncoder, RankingExplanation, Reranker};

#[derive(Debug, Error, Diagnostic)]
pub enum RankError {
    #[error("cross-encoder transport error: {0}")]
    #[diagnostic(code(findry::rank::transport))]
    Transport(String),

    #[error("cross-encoder returned HTTP {status}")]
    #[diagnostic(code(findry::rank::http_status))]
    HttpStatus { status: u16 },

    #[error("cross-encoder returned {got} scores for {expected} pairs")]
    #[diagnostic(code(findry::rank::score_count))]
    ScoreCount { got: usize, expected: usize },

    #[error("feedback store error: {0}")]
    #[diagnostic(code(findry::rank::feedback))]
    Feedback(#[from] sqlx::Error),
}
