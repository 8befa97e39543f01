//! Shared work queue
//!
//! Priority-ordered task storage with an exactly-once claim guarantee.
//! Producers enqueue [`Task`]s, workers claim them with
//! [`TaskQueue::claim_next`] and report back with `complete`/`fail`.

pub mod store;
pub mod task;

use serde::{Deserialize, Serialize};

use crate::cognition::AgentSolution;
use crate::verifier::QualityReport;

pub use store::{QueueError, QueueResult, QueueStats, SharedTaskQueue, TaskQueue};
pub use task::{Task, TaskId, TaskKind, TaskPriority, TaskStatus};

/// Payload recorded on a completed task.
///
/// The queue stores it as opaque JSON; this type is the shape workers write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub solution: AgentSolution,
    pub report: QualityReport,
    /// Cognition cycles run before the gate accepted the solution.
    pub gate_attempts: u32,
}

impl TaskResult {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
