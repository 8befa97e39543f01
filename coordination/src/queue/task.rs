//! Task data model for the shared work queue.
//!
//! Tasks are the atomic units of work claimed by agent workers. Each task
//! tracks its priority, lifecycle status, the worker holding it, and the
//! result or error it finished with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Scheduling priority. `Immediate` always jumps the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Immediate,
    High,
    #[default]
    Medium,
    Low,
}

impl TaskPriority {
    /// Numeric rank, lower is served first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Whether this priority is urgent enough to justify a paid model tier.
    pub fn is_urgent(self) -> bool {
        matches!(self, Self::Immediate | Self::High)
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" | "critical" | "urgent" => Ok(Self::Immediate),
            "high" => Ok(Self::High),
            "medium" | "normal" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// What sort of work a task represents.
///
/// The router treats `Review` and `Check` as low-stakes and keeps them on
/// the free tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Feature,
    Bugfix,
    Refactor,
    Test,
    Documentation,
    Review,
    Check,
}

impl TaskKind {
    /// Low-stakes work that never needs a metered model.
    pub fn is_low_stakes(self) -> bool {
        matches!(self, Self::Review | Self::Check)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feature => write!(f, "feature"),
            Self::Bugfix => write!(f, "bugfix"),
            Self::Refactor => write!(f, "refactor"),
            Self::Test => write!(f, "test"),
            Self::Documentation => write!(f, "documentation"),
            Self::Review => write!(f, "review"),
            Self::Check => write!(f, "check"),
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" => Ok(Self::Feature),
            "bugfix" | "bug" | "fix" => Ok(Self::Bugfix),
            "refactor" => Ok(Self::Refactor),
            "test" | "tests" => Ok(Self::Test),
            "documentation" | "docs" => Ok(Self::Documentation),
            "review" => Ok(Self::Review),
            "check" | "lint" => Ok(Self::Check),
            other => Err(format!("unknown task kind: {other}")),
        }
    }
}

/// Task lifecycle status.
///
/// `Pending → InProgress → Completed | Failed | Cancelled`. Terminal states
/// are only left through an explicit re-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are allowed without a re-queue.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Short human-readable title.
    pub title: String,
    /// Free-text description of what should be done.
    pub description: String,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Kind of work, used for routing decisions.
    #[serde(default)]
    pub kind: TaskKind,
    /// Capabilities a worker must offer to claim this task.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Worker currently (or last) holding the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    /// Number of times the task has been claimed.
    #[serde(default)]
    pub attempts: u32,
    /// Number of times the task was released back to pending.
    #[serde(default)]
    pub releases: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload recorded on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error recorded on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task with medium priority.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: description.into(),
            priority: TaskPriority::default(),
            kind: TaskKind::default(),
            required_capabilities: Vec::new(),
            status: TaskStatus::Pending,
            assigned_worker: None,
            attempts: 0,
            releases: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    /// Require a capability from whichever worker claims this task.
    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    /// Whether a worker offering `capabilities` may claim this task.
    ///
    /// Matching is case-insensitive. A task with no requirements matches
    /// every worker.
    pub fn matches_capabilities(&self, capabilities: &[String]) -> bool {
        self.required_capabilities.iter().all(|required| {
            capabilities
                .iter()
                .any(|offered| offered.eq_ignore_ascii_case(required))
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_short() {
        let id = TaskId::new();
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_task_id_from_str() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("invalid".parse::<TaskId>().is_err());
    }

    #[test]
    fn test_priority_rank_ordering() {
        assert!(TaskPriority::Immediate.rank() < TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() < TaskPriority::Medium.rank());
        assert!(TaskPriority::Medium.rank() < TaskPriority::Low.rank());
    }

    #[test]
    fn test_priority_from_str_aliases() {
        assert_eq!("critical".parse::<TaskPriority>(), Ok(TaskPriority::Immediate));
        assert_eq!("HIGH".parse::<TaskPriority>(), Ok(TaskPriority::High));
        assert!("whenever".parse::<TaskPriority>().is_err());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_empty_requirements_match_any_worker() {
        let task = Task::new("t", "d");
        assert!(task.matches_capabilities(&[]));
        assert!(task.matches_capabilities(&["backend".to_string()]));
    }

    #[test]
    fn test_requirements_must_all_be_offered() {
        let task = Task::new("t", "d").requiring("backend").requiring("rust");
        assert!(!task.matches_capabilities(&["backend".to_string()]));
        assert!(task.matches_capabilities(&["Rust".to_string(), "backend".to_string()]));
    }

    #[test]
    fn test_low_stakes_kinds() {
        assert!(TaskKind::Review.is_low_stakes());
        assert!(TaskKind::Check.is_low_stakes());
        assert!(!TaskKind::Refactor.is_low_stakes());
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
