//! Agent cognition
//!
//! Turns a task into an evaluated [`AgentSolution`] in four phases:
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────┐   ┌────────────┐
//! │ Analyze  │──▶│ Generate options │──▶│  Select  │──▶│  Justify   │
//! │ (model)  │   │     (model)      │   │  (pure)  │   │ + evaluate │
//! └──────────┘   └──────────────────┘   └──────────┘   └────────────┘
//! ```
//!
//! A single [`CognitivePipeline`] implementation is parameterized by an
//! [`AgentSpecialization`] (prompts, evaluation weights, selection rule).
//! Progress is reported as [`ThoughtEvent`]s on an optional channel.

pub mod context;
pub mod evaluate;
pub mod parse;
pub mod phase;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod specialization;
pub mod types;

pub use context::{
    CodingStandards, ContextError, ContextResult, KnowledgeSearcher, KnowledgeSnippet,
    NoopKnowledgeSearcher, ProjectContext, ProjectContextProvider, StaticProjectContext,
    WorkspaceScanner,
};
pub use evaluate::{evaluate_option, select_option, EvaluationDimension};
pub use phase::{IllegalPhaseTransition, PhaseTracker, PhaseTransition, ThoughtPhase};
pub use pipeline::{fallback_analysis, fallback_option, CognitivePipeline, PipelineConfig};
pub use provider::{InferenceProvider, ModelHint, ProviderError, ProviderResult};
pub use specialization::{
    AgentSpecialization, EvaluationWeights, SelectionRule, SpecializationError,
    SpecializationResult, BUILTIN_SPECIALIZATIONS,
};
pub use types::{
    AgentAnalysis, AgentSolution, AgentThoughts, ChangeKind, Complexity, ProposedChange,
    SolutionEvaluation, SolutionOption, ThoughtEvent, ThoughtProgress,
};
