//! Cognition data types: options, analysis, thoughts and solutions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::CodingStandards;
use super::phase::{PhaseTransition, ThoughtPhase};
use crate::queue::TaskId;

/// Complexity tier declared by a solution option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    /// Lenient parse used for model output. Unknown values map to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "simple" | "trivial" | "easy" => Self::Low,
            "high" | "complex" | "hard" | "very high" => Self::High,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    #[default]
    Modify,
    Delete,
}

/// One file-level change a solution declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub path: String,
    pub description: String,
    #[serde(default)]
    pub estimated_lines: u32,
    #[serde(default)]
    pub kind: ChangeKind,
}

impl ProposedChange {
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            estimated_lines: 0,
            kind: ChangeKind::Modify,
        }
    }

    pub fn with_lines(mut self, lines: u32) -> Self {
        self.estimated_lines = lines;
        self
    }

    pub fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Test files by path convention.
    pub fn is_test(&self) -> bool {
        let p = self.path.to_ascii_lowercase();
        p.contains("test") || p.contains("spec.") || p.contains("/spec/")
    }

    /// Dependency manifests (`Cargo.toml`, `package.json`, ...).
    pub fn is_manifest(&self) -> bool {
        const MANIFESTS: &[&str] = &[
            "cargo.toml",
            "package.json",
            "pyproject.toml",
            "requirements.txt",
            "go.mod",
            "pom.xml",
            "build.gradle",
        ];
        let name = self
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
            .to_ascii_lowercase();
        MANIFESTS.contains(&name.as_str())
    }
}

/// A candidate approach produced while thinking about a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionOption {
    pub id: String,
    pub title: String,
    pub description: String,
    pub approach: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
    pub estimated_minutes: u32,
    pub complexity: Complexity,
    /// Self-assessed confidence in [0, 1].
    pub confidence: f64,
    pub files: Vec<String>,
    pub risks: Vec<String>,
    #[serde(default)]
    pub changes: Vec<ProposedChange>,
}

impl SolutionOption {
    pub fn new_id() -> String {
        format!("opt-{}", &Uuid::new_v4().simple().to_string()[..8])
    }

    /// Options at or below 0.5 confidence document an approach the agent
    /// would reject.
    pub fn is_viable(&self) -> bool {
        self.confidence > 0.5
    }

    /// Every path this option touches, declared files first.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for p in self.files.iter().chain(self.changes.iter().map(|c| &c.path)) {
            if !paths.contains(p) {
                paths.push(p.clone());
            }
        }
        paths
    }

    /// Declared changes, or one `modify` entry per declared file when the
    /// option only lists files.
    pub fn effective_changes(&self) -> Vec<ProposedChange> {
        if !self.changes.is_empty() {
            return self.changes.clone();
        }
        self.files
            .iter()
            .map(|f| ProposedChange::new(f.clone(), self.approach.clone()))
            .collect()
    }
}

/// Output of the analyze phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAnalysis {
    pub problem: String,
    pub context: String,
    pub constraints: Vec<String>,
    /// Built locally because the provider failed or answered garbage.
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtProgress {
    pub completed_phases: u8,
    pub total_phases: u8,
    pub inference_calls: u32,
    pub fallbacks: u32,
}

/// Everything produced by `think`: analysis, options and the phase log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentThoughts {
    pub agent: String,
    pub task_id: TaskId,
    pub phase: ThoughtPhase,
    pub analysis: AgentAnalysis,
    pub options: Vec<SolutionOption>,
    pub progress: ThoughtProgress,
    pub transitions: Vec<PhaseTransition>,
    /// Standards from the project snapshot, reused when evaluating.
    #[serde(default)]
    pub standards: CodingStandards,
}

/// Five independent scores in [0, 1] plus the specialization-weighted
/// aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolutionEvaluation {
    pub quality: f64,
    pub performance: f64,
    pub security: f64,
    pub maintainability: f64,
    pub compliance: f64,
    pub aggregate: f64,
}

/// Accepted output of cognition for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSolution {
    pub id: String,
    pub agent: String,
    pub specialization: String,
    pub task_id: TaskId,
    pub option: SolutionOption,
    pub justification: String,
    pub evaluation: SolutionEvaluation,
    pub confidence: f64,
    pub estimated_minutes: u32,
    pub changes: Vec<ProposedChange>,
    pub alternatives_considered: usize,
    pub created_at: DateTime<Utc>,
}

/// Progress events emitted while a pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ThoughtEvent {
    PhaseChanged {
        agent: String,
        task_id: TaskId,
        from: ThoughtPhase,
        to: ThoughtPhase,
    },
    AnalysisReady {
        agent: String,
        task_id: TaskId,
        problem: String,
        fallback: bool,
    },
    OptionsGenerated {
        agent: String,
        task_id: TaskId,
        count: usize,
        viable: usize,
    },
    OptionSelected {
        agent: String,
        task_id: TaskId,
        option_id: String,
        title: String,
        confidence: f64,
    },
    Fallback {
        agent: String,
        task_id: TaskId,
        phase: ThoughtPhase,
        error: String,
    },
    SolutionReady {
        agent: String,
        task_id: TaskId,
        solution_id: String,
        aggregate: f64,
    },
}

impl ThoughtEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::PhaseChanged { task_id, .. }
            | Self::AnalysisReady { task_id, .. }
            | Self::OptionsGenerated { task_id, .. }
            | Self::OptionSelected { task_id, .. }
            | Self::Fallback { task_id, .. }
            | Self::SolutionReady { task_id, .. } => *task_id,
        }
    }
}
