//! Cognition phase state machine.
//!
//! Every task an agent works on moves through the same four phases:
//!
//! ```text
//! Idle → Analyzing → GeneratingOptions → Selecting → Justifying → Completed
//! ```
//!
//! Any non-terminal phase may move to `Failed`. The tracker validates each
//! transition and keeps a log that ends up in the returned `AgentThoughts`.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtPhase {
    #[default]
    Idle,
    Analyzing,
    GeneratingOptions,
    Selecting,
    Justifying,
    Completed,
    Failed,
}

impl ThoughtPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the happy path, used for progress reporting.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Analyzing => 1,
            Self::GeneratingOptions => 2,
            Self::Selecting => 3,
            Self::Justifying => 4,
            Self::Completed | Self::Failed => 5,
        }
    }
}

impl fmt::Display for ThoughtPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::GeneratingOptions => write!(f, "generating_options"),
            Self::Selecting => write!(f, "selecting"),
            Self::Justifying => write!(f, "justifying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

fn is_legal_transition(from: ThoughtPhase, to: ThoughtPhase) -> bool {
    use ThoughtPhase::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Analyzing)
            | (Analyzing, GeneratingOptions)
            | (GeneratingOptions, Selecting)
            | (Selecting, Justifying)
            | (Justifying, Completed)
    )
}

/// A single recorded phase change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: ThoughtPhase,
    pub to: ThoughtPhase,
    /// Milliseconds since the tracker was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal phase transition: {from} → {to}")]
pub struct IllegalPhaseTransition {
    pub from: ThoughtPhase,
    pub to: ThoughtPhase,
}

/// Tracks the phase of one cognition cycle.
#[derive(Debug)]
pub struct PhaseTracker {
    current: ThoughtPhase,
    created_at: Instant,
    transitions: Vec<PhaseTransition>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::resume(ThoughtPhase::Idle, Vec::new())
    }

    /// Continue a cycle from a previously recorded phase and log.
    pub fn resume(current: ThoughtPhase, transitions: Vec<PhaseTransition>) -> Self {
        Self {
            current,
            created_at: Instant::now(),
            transitions,
        }
    }

    pub fn current(&self) -> ThoughtPhase {
        self.current
    }

    pub fn advance(
        &mut self,
        to: ThoughtPhase,
        note: Option<&str>,
    ) -> Result<(), IllegalPhaseTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalPhaseTransition {
                from: self.current,
                to,
            });
        }

        tracing::trace!(from = %self.current, to = %to, "Phase transition");
        self.transitions.push(PhaseTransition {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            note: note.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn fail(&mut self, note: &str) -> Result<(), IllegalPhaseTransition> {
        self.advance(ThoughtPhase::Failed, Some(note))
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<PhaseTransition> {
        self.transitions
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
