use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Discriminator of a step event as seen by the SSE consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A progress step from an agent.
    Step,
    /// Terminal event: the workflow finished; the stream ends after this.
    Complete,
    /// Terminal event: the workflow failed; the stream ends after this.
    Error,
    /// Terminal event: the consumer-side timeout elapsed.
    Timeout,
}

/// A structured progress record emitted by any agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub agent: String,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl StepEvent {
    pub fn step(
        agent: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind: StepKind::Step,
            agent: agent.into(),
            action: action.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn complete() -> Self {
        Self {
            kind: StepKind::Complete,
            agent: String::new(),
            action: "Complete".into(),
            details: "Search complete".into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Error,
            agent: String::new(),
            action: "Error".into(),
            details: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: StepKind::Timeout,
            agent: String::new(),
            action: "Timeout".into(),
            details: "Step streaming timed out".into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, StepKind::Step)
    }

    /// Normalized JSON shape used for SSE data frames.
    pub fn to_json_value(&self) -> Value {
        json!({
            "type": match self.kind {
                StepKind::Step => "step",
                StepKind::Complete => "complete",
                StepKind::Error => "error",
                StepKind::Timeout => "timeout",
            },
            "agent": self.agent,
            "action": self.action,
            "details": self.details,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

impl fmt::Display for StepEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agent.is_empty() {
            write!(f, "{}: {}", self.action, self.details)
        } else {
            write!(f, "[{}] {}: {}", self.agent, self.action, self.details)
        }
    }
}
