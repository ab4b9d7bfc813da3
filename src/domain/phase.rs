//! User-facing phase vocabulary and timeline entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse pipeline milestone, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Plan,
    Ingest,
    Generate,
    Review,
    Publish,
    Published,
    Complete,
    Error,
}

impl Phase {
    /// Every phase, in vocabulary order
    pub const ALL: [Phase; 9] = [
        Phase::Init,
        Phase::Plan,
        Phase::Ingest,
        Phase::Generate,
        Phase::Review,
        Phase::Publish,
        Phase::Published,
        Phase::Complete,
        Phase::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Plan => "plan",
            Phase::Ingest => "ingest",
            Phase::Generate => "generate",
            Phase::Review => "review",
            Phase::Publish => "publish",
            Phase::Published => "published",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }

    /// Sentence shown when the producer gives no text of its own
    pub fn default_text(&self) -> &'static str {
        match self {
            Phase::Init => "Starting orchestration",
            Phase::Plan => "Execution plan ready",
            Phase::Ingest => "Reading your source content",
            Phase::Generate => "Generating platform variants",
            Phase::Review => "Reviewing generated variants",
            Phase::Publish => "Publishing to your platforms",
            Phase::Published => "Published",
            Phase::Complete => "Orchestration complete",
            Phase::Error => "Orchestration failed",
        }
    }

    /// Terminal phases are only reachable through typed terminal events
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == needle)
            .ok_or_else(|| format!("Unknown phase: {}", s))
    }
}

/// One deduplicated entry of a job's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: Phase,

    /// Human-readable sentence for this phase
    pub text: String,

    /// Local arrival time
    pub received_at: DateTime<Utc>,
}

impl PhaseEvent {
    pub fn new(phase: Phase, text: impl Into<String>) -> Self {
        Self {
            phase,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}
