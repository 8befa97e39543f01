//! Swarm Coordination Library
//!
//! Deterministic core of an autonomous coding swarm:
//! - `queue`: priority task queue with exactly-once claims
//! - `events`: publish/subscribe message bus with direct mailboxes
//! - `cognition`: analyze → options → select → justify pipeline per agent
//! - `verifier`: quality gate that accepts or rejects solutions
//! - `router`: cost-aware model tier selection under a budget
//!
//! Process concerns (configuration, HTTP backends, worker loops, health
//! monitoring) live in the `swarm-agents` crate.
//!
//! # Flow
//!
//! ```text
//! submit ──▶ TaskQueue ──claim──▶ worker ──▶ CognitivePipeline ──▶ QualityGate
//!                ▲                  │              │ (InferenceProvider)   │
//!                └──release/fail────┘              ▼                       ▼
//!                                         CostAwareRouter            complete
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod cognition;
pub mod events;
pub mod queue;
pub mod router;
pub mod verifier;

// Re-export key queue types
pub use queue::{
    QueueError, QueueResult, QueueStats, SharedTaskQueue, Task, TaskId, TaskKind, TaskPriority,
    TaskQueue, TaskResult, TaskStatus,
};

// Re-export key event types
pub use events::{BusMessage, BusStats, Mailbox, MessageBus, SharedMessageBus, Subscription};

// Re-export key cognition types
pub use cognition::{
    AgentSolution, AgentSpecialization, AgentThoughts, CognitivePipeline, InferenceProvider,
    ModelHint, PipelineConfig, ProjectContext, ProviderError, ThoughtEvent, ThoughtPhase,
};

// Re-export verifier types
pub use verifier::{QualityGate, QualityGateConfig, QualityReport};

// Re-export router types
pub use router::{CostAwareRouter, ModelChoice, ModelTier, RouterConfig, UsageSnapshot};
