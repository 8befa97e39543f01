//! Message types for the swarm message bus
//!
//! Every message travels in a [`BusMessage`] envelope. The payload is plain
//! JSON so workers with different specializations can exchange data without
//! sharing Rust types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A worker claimed a task.
pub const TOPIC_TASK_CLAIMED: &str = "task.claimed";
/// A task passed the quality gate and was completed.
pub const TOPIC_TASK_COMPLETED: &str = "task.completed";
/// A task was failed by its worker.
pub const TOPIC_TASK_FAILED: &str = "task.failed";
/// Intermediate cognition progress from a worker.
pub const TOPIC_AGENT_PROGRESS: &str = "agent.progress";
/// Orchestrator health events (unhealthy worker, restart, release).
pub const TOPIC_SWARM_HEALTH: &str = "swarm.health";

/// Unique identifier for messages
pub type MessageId = String;

/// How a message was addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "to", rename_all = "snake_case")]
pub enum MessageTarget {
    /// Delivered to every subscriber of the topic
    Topic(String),
    /// Delivered to exactly one registered worker
    Direct(String),
    /// Delivered to every registered worker
    Broadcast,
}

impl MessageTarget {
    /// Key used for per-target statistics.
    pub fn stats_key(&self) -> String {
        match self {
            Self::Topic(topic) => topic.clone(),
            Self::Direct(_) => "direct".to_string(),
            Self::Broadcast => "broadcast".to_string(),
        }
    }
}

impl std::fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(topic) => write!(f, "topic:{topic}"),
            Self::Direct(id) => write!(f, "direct:{id}"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Envelope for everything that travels over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: MessageId,
    pub target: MessageTarget,
    /// Identity of the publisher (worker id, `orchestrator`, ...)
    pub sender: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(
        target: MessageTarget,
        sender: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Self::new_id(),
            target,
            sender: sender.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Generate a new unique message ID
    pub fn new_id() -> MessageId {
        Uuid::new_v4().to_string()
    }

    /// Topic name, if this was a topic publish.
    pub fn topic(&self) -> Option<&str> {
        match &self.target {
            MessageTarget::Topic(topic) => Some(topic),
            _ => None,
        }
    }
}

/// Compact record of a message kept in the bus's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    pub target: MessageTarget,
    pub sender: String,
    pub recipients: usize,
    pub timestamp: DateTime<Utc>,
}
