//! The specialist agent roster.
//!
//! Every agent follows the same discipline: it takes its inputs, may call
//! the model through [`crate::llm::LlmClient`] with an explicit fallback,
//! and returns a value — never an error — into the workflow. Each agent
//! carries a display name used in step events so the UI can attribute
//! progress.

pub mod adaptive;
pub mod analyst;
pub mod clarifier;
pub mod classifier;
pub mod confidence;
pub mod controller;
pub mod critic;
pub mod explainer;
pub mod graph_rag;
pub mod planner;
pub mod summarizer;

pub use adaptive::{AdaptiveRetriever, RetrievalStrategy, StrategyDecision};
pub use analyst::{AnalysisAgent, ComparisonResult};
pub use clarifier::{AmbiguityReport, ClarificationAgent};
pub use classifier::{Classification, QueryClassifier, QueryIntent};
pub use confidence::{ConfidenceScorer, EvidenceStrength};
pub use controller::{CorrectedResults, RetrievalAttempt, RetrievalController, SearchFn};
pub use critic::{CriticAgent, QualityEvaluation};
pub use explainer::ExplanationAgent;
pub use graph_rag::{GraphExpansion, GraphRagAgent, GraphRagResult};
pub use planner::{QueryComplexity, ReasoningPlanner, SubQuery, SynthesizedAnswer};
pub use summarizer::{SummarizationAgent, SummaryType};
