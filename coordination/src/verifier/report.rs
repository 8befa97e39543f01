//! Quality report: structured output of the quality gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    Critical,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What the gate found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Placeholder/TODO/stub language in a change description
    IncompleteMarker,
    /// A single file change declaring too many lines
    OversizedChange,
    /// Declared use of an untyped escape hatch
    UntypedEscapeHatch,
    /// Many files touched without a dependency-manifest change
    MissingManifestUpdate,
    /// Target file already exceeds the project's size limit
    LargeExistingFile,
    /// A change modifies or deletes a file that does not exist
    MissingTargetFile,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IncompleteMarker => write!(f, "incomplete_marker"),
            Self::OversizedChange => write!(f, "oversized_change"),
            Self::UntypedEscapeHatch => write!(f, "untyped_escape_hatch"),
            Self::MissingManifestUpdate => write!(f, "missing_manifest_update"),
            Self::LargeExistingFile => write!(f, "large_existing_file"),
            Self::MissingTargetFile => write!(f, "missing_target_file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub message: String,
    /// File the issue refers to, when it is file-specific
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Points subtracted for this issue
    pub penalty: f64,
}

/// Gate verdict for one solution. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution_id: Option<String>,
    /// Score in [0, 100]
    pub score: f64,
    pub threshold: f64,
    pub passed: bool,
    /// Issues in detection order
    pub issues: Vec<QualityIssue>,
    pub recommendations: Vec<String>,
    /// Whether workspace file checks ran
    pub workspace_checked: bool,
}

impl QualityReport {
    pub fn count(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_critical(&self) -> bool {
        self.count(IssueSeverity::Critical) > 0
    }

    pub fn issues_of(&self, issue_type: IssueType) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |i| i.issue_type == issue_type)
    }

    /// One-line summary for logs and failure messages.
    pub fn summary(&self) -> String {
        format!(
            "{} score={:.0}/{:.0} issues={} (critical={}, medium={}, low={})",
            if self.passed { "PASS" } else { "FAIL" },
            self.score,
            self.threshold,
            self.issues.len(),
            self.count(IssueSeverity::Critical),
            self.count(IssueSeverity::Medium),
            self.count(IssueSeverity::Low),
        )
    }
}
