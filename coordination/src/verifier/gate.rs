//! Quality gate: scores a proposed solution before it is trusted.
//!
//! Scoring starts at 100 and subtracts a fixed penalty per issue, so adding
//! an issue can never raise a score. An empty changeset scores exactly 100.
//! File-level checks run only when a [`WorkspaceReader`] is attached; reader
//! errors skip the check rather than failing validation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::report::{IssueSeverity, IssueType, QualityIssue, QualityReport};
use crate::cognition::{AgentSolution, ChangeKind, ProposedChange};

/// Read-only file lookup used by the file-size and target-existence checks.
pub trait WorkspaceReader: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn read_to_string(&self, path: &str) -> std::io::Result<String>;
}

/// Workspace reader backed by the local filesystem, rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl WorkspaceReader for FsWorkspace {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read_to_string(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.resolve(path))
    }
}

/// Per-issue penalties in score points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyTable {
    pub incomplete_marker: f64,
    pub oversized_change: f64,
    pub untyped_escape_hatch: f64,
    pub large_existing_file: f64,
    pub missing_target_file: f64,
    pub missing_manifest_update: f64,
}

impl Default for PenaltyTable {
    fn default() -> Self {
        Self {
            incomplete_marker: 15.0,
            oversized_change: 10.0,
            untyped_escape_hatch: 5.0,
            large_existing_file: 5.0,
            missing_target_file: 5.0,
            missing_manifest_update: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGateConfig {
    /// Pass threshold, clamped to [0, 100] when used
    pub min_acceptable_score: f64,
    /// Largest estimated line count for a single file change
    pub max_change_lines: u32,
    /// Changesets touching at least this many files expect a manifest change
    pub large_changeset_files: usize,
    /// Existing files longer than this draw an advisory
    pub max_file_lines: usize,
    /// Case-insensitive words and phrases that mark unfinished work
    pub incomplete_markers: Vec<String>,
    pub penalties: PenaltyTable,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            min_acceptable_score: 70.0,
            max_change_lines: 200,
            large_changeset_files: 4,
            max_file_lines: 500,
            incomplete_markers: [
                "todo",
                "fixme",
                "xxx",
                "tbd",
                "placeholder",
                "stub",
                "stubbed",
                "not implemented",
                "unimplemented",
                "to be implemented",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            penalties: PenaltyTable::default(),
        }
    }
}

impl QualityGateConfig {
    pub fn threshold(&self) -> f64 {
        if self.min_acceptable_score.is_nan() {
            return 0.0;
        }
        self.min_acceptable_score.clamp(0.0, 100.0)
    }
}

/// Validates solutions against the configured quality bar.
pub struct QualityGate {
    config: QualityGateConfig,
    markers: Option<Regex>,
    escape_hatch: Option<Regex>,
    workspace: Option<Arc<dyn WorkspaceReader>>,
}

impl QualityGate {
    pub fn new(config: QualityGateConfig) -> Self {
        let markers = if config.incomplete_markers.is_empty() {
            None
        } else {
            let alternation = config
                .incomplete_markers
                .iter()
                .map(|m| regex::escape(m.trim()))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).ok()
        };
        Self {
            config,
            markers,
            escape_hatch: untyped_escape_regex(),
            workspace: None,
        }
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceReader>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn config(&self) -> &QualityGateConfig {
        &self.config
    }

    /// Score a solution.
    pub fn validate(&self, solution: &AgentSolution) -> QualityReport {
        let mut report = self.validate_changes(&solution.changes);
        report.solution_id = Some(solution.id.clone());
        debug!(
            solution_id = %solution.id,
            task_id = %solution.task_id,
            summary = %report.summary(),
            "Quality gate evaluated"
        );
        report
    }

    /// Score a bare changeset.
    pub fn validate_changes(&self, changes: &[ProposedChange]) -> QualityReport {
        let mut issues = Vec::new();

        for change in changes {
            self.check_markers(change, &mut issues);
            self.check_size(change, &mut issues);
            self.check_escape_hatch(change, &mut issues);
        }
        self.check_manifest(changes, &mut issues);
        let workspace_checked = match &self.workspace {
            Some(ws) => {
                for change in changes {
                    self.check_workspace(ws.as_ref(), change, &mut issues);
                }
                true
            }
            None => false,
        };

        let penalty: f64 = issues.iter().map(|i| i.penalty.max(0.0)).sum();
        let score = (100.0 - penalty).clamp(0.0, 100.0);
        let threshold = self.config.threshold();
        let passed = score >= threshold;
        let recommendations = recommendations(&issues, passed);

        QualityReport {
            timestamp: Utc::now(),
            solution_id: None,
            score,
            threshold,
            passed,
            issues,
            recommendations,
            workspace_checked,
        }
    }

    fn issue(
        &self,
        issue_type: IssueType,
        severity: IssueSeverity,
        penalty: f64,
        message: String,
        path: &str,
    ) -> QualityIssue {
        QualityIssue {
            issue_type,
            severity,
            message,
            path: Some(path.to_string()),
            penalty,
        }
    }

    fn check_markers(&self, change: &ProposedChange, issues: &mut Vec<QualityIssue>) {
        let Some(markers) = &self.markers else {
            return;
        };
        for found in markers.find_iter(&change.description) {
            issues.push(self.issue(
                IssueType::IncompleteMarker,
                IssueSeverity::Critical,
                self.config.penalties.incomplete_marker,
                format!("Incomplete marker \"{}\" in change description", found.as_str()),
                &change.path,
            ));
        }
    }

    fn check_size(&self, change: &ProposedChange, issues: &mut Vec<QualityIssue>) {
        if change.estimated_lines > self.config.max_change_lines {
            issues.push(self.issue(
                IssueType::OversizedChange,
                IssueSeverity::Medium,
                self.config.penalties.oversized_change,
                format!(
                    "Change declares {} lines, limit is {}",
                    change.estimated_lines, self.config.max_change_lines
                ),
                &change.path,
            ));
        }
    }

    fn check_escape_hatch(&self, change: &ProposedChange, issues: &mut Vec<QualityIssue>) {
        let Some(escape_hatch) = &self.escape_hatch else {
            return;
        };
        if let Some(found) = escape_hatch.find(&change.description) {
            issues.push(self.issue(
                IssueType::UntypedEscapeHatch,
                IssueSeverity::Low,
                self.config.penalties.untyped_escape_hatch,
                format!("Untyped escape hatch \"{}\" declared", found.as_str().trim()),
                &change.path,
            ));
        }
    }

    fn check_manifest(&self, changes: &[ProposedChange], issues: &mut Vec<QualityIssue>) {
        let files: BTreeSet<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        if files.len() >= self.config.large_changeset_files.max(1)
            && !changes.iter().any(ProposedChange::is_manifest)
        {
            issues.push(QualityIssue {
                issue_type: IssueType::MissingManifestUpdate,
                severity: IssueSeverity::Low,
                message: format!(
                    "{} files changed without a dependency manifest update",
                    files.len()
                ),
                path: None,
                penalty: self.config.penalties.missing_manifest_update,
            });
        }
    }

    fn check_workspace(
        &self,
        ws: &dyn WorkspaceReader,
        change: &ProposedChange,
        issues: &mut Vec<QualityIssue>,
    ) {
        if change.kind == ChangeKind::Create {
            return;
        }
        if !ws.exists(&change.path) {
            issues.push(self.issue(
                IssueType::MissingTargetFile,
                IssueSeverity::Low,
                self.config.penalties.missing_target_file,
                format!("{} target does not exist", change_verb(change.kind)),
                &change.path,
            ));
            return;
        }
        if change.kind != ChangeKind::Modify {
            return;
        }
        match ws.read_to_string(&change.path) {
            Ok(content) => {
                let lines = content.lines().count();
                if lines > self.config.max_file_lines {
                    issues.push(self.issue(
                        IssueType::LargeExistingFile,
                        IssueSeverity::Low,
                        self.config.penalties.large_existing_file,
                        format!(
                            "File already has {lines} lines, limit is {}",
                            self.config.max_file_lines
                        ),
                        &change.path,
                    ));
                }
            }
            Err(e) => {
                debug!(path = %change.path, error = %e, "Skipping file size check");
            }
        }
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(QualityGateConfig::default())
    }
}

fn change_verb(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Create => "Create",
        ChangeKind::Modify => "Modify",
        ChangeKind::Delete => "Delete",
    }
}

fn untyped_escape_regex() -> Option<Regex> {
    Regex::new(
        r"(?i)(:\s*any\b|\bas\s+any\b|<any>|@ts-ignore|@ts-nocheck|#\s*type:\s*ignore|\btransmute\b|\buntyped\b|\binterface\{\})",
    )
    .ok()
}

fn recommendations(issues: &[QualityIssue], passed: bool) -> Vec<String> {
    let mut recs = Vec::new();
    let count = |t: IssueType| issues.iter().filter(|i| i.issue_type == t).count();

    let critical = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Critical)
        .count();
    if critical > 0 {
        recs.push(format!(
            "Rework the solution: {critical} critical issue(s) mark unfinished work that must be completed before resubmitting"
        ));
    } else if passed {
        recs.push("Solution meets the quality bar and can proceed".to_string());
    } else {
        recs.push("Score is below the acceptance threshold; address the reported issues".to_string());
    }

    if count(IssueType::OversizedChange) > 0 {
        recs.push("Split oversized file changes into smaller, reviewable steps".to_string());
    }
    if count(IssueType::UntypedEscapeHatch) > 0 {
        recs.push("Replace untyped escape hatches with concrete types".to_string());
    }
    if count(IssueType::MissingManifestUpdate) > 0 {
        recs.push("Confirm whether the changeset needs dependency manifest updates".to_string());
    }
    if count(IssueType::LargeExistingFile) > 0 {
        recs.push("Consider extracting modules from files that exceed the size limit".to_string());
    }
    if count(IssueType::MissingTargetFile) > 0 {
        recs.push("Check paths of changes that target files missing from the workspace".to_string());
    }
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemWorkspace(HashMap<String, String>);

    impl WorkspaceReader for MemWorkspace {
        fn exists(&self, path: &str) -> bool {
            self.0.contains_key(path)
        }
        fn read_to_string(&self, path: &str) -> std::io::Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, path.to_string()))
        }
    }

    fn change(path: &str, description: &str, lines: u32) -> ProposedChange {
        ProposedChange::new(path, description).with_lines(lines)
    }

    #[test]
    fn test_empty_changeset_scores_100() {
        let report = QualityGate::default().validate_changes(&[]);
        assert_eq!(report.score, 100.0);
        assert!(report.passed);
        assert!(report.issues.is_empty());
        assert_eq!(
            report.recommendations,
            vec!["Solution meets the quality bar and can proceed".to_string()]
        );
    }

    #[test]
    fn test_incomplete_marker_is_critical() {
        let report = QualityGate::default()
            .validate_changes(&[change("src/a.rs", "Add handler, TODO: error paths", 20)]);
        assert_eq!(report.score, 85.0);
        assert!(report.passed);
        assert!(report.has_critical());
        assert!(report.recommendations[0].starts_with("Rework"));
    }

    #[test]
    fn test_marker_matching_respects_word_boundaries() {
        let report = QualityGate::default()
            .validate_changes(&[change("src/a.rs", "Update the stubborn todolist parser", 20)]);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_two_markers_fail_default_threshold() {
        let report = QualityGate::default().validate_changes(&[
            change("src/a.rs", "placeholder implementation", 10),
            change("src/b.rs", "FIXME later", 10),
        ]);
        assert_eq!(report.score, 70.0);
        assert!(report.passed);

        let report = QualityGate::default().validate_changes(&[
            change("src/a.rs", "placeholder implementation, TODO", 10),
            change("src/b.rs", "FIXME later", 10),
        ]);
        assert_eq!(report.score, 55.0);
        assert!(!report.passed);
    }

    #[test]
    fn test_oversized_and_escape_hatch() {
        let report = QualityGate::default().validate_changes(&[change(
            "src/api.ts",
            "Cast payload as any to silence the compiler",
            350,
        )]);
        assert_eq!(report.score, 85.0);
        assert_eq!(report.count(IssueSeverity::Medium), 1);
        assert_eq!(report.count(IssueSeverity::Low), 1);
    }

    #[test]
    fn test_large_changeset_without_manifest_is_advisory() {
        let changes: Vec<_> = (0..4)
            .map(|i| change(&format!("src/m{i}.rs"), "refactor", 10))
            .collect();
        let report = QualityGate::default().validate_changes(&changes);
        assert_eq!(report.issues_of(IssueType::MissingManifestUpdate).count(), 1);
        assert_eq!(report.score, 100.0);

        let mut with_manifest = changes.clone();
        with_manifest.push(change("Cargo.toml", "add dependency", 2));
        let report = QualityGate::default().validate_changes(&with_manifest);
        assert_eq!(report.issues_of(IssueType::MissingManifestUpdate).count(), 0);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let gate = QualityGate::new(QualityGateConfig {
            min_acceptable_score: 250.0,
            ..Default::default()
        });
        let report = gate.validate_changes(&[]);
        assert_eq!(report.threshold, 100.0);
        assert!(report.passed);

        let gate = QualityGate::new(QualityGateConfig {
            min_acceptable_score: -5.0,
            ..Default::default()
        });
        assert_eq!(gate.config().threshold(), 0.0);
    }

    #[test]
    fn test_score_never_below_zero() {
        let changes: Vec<_> = (0..10)
            .map(|i| change(&format!("src/m{i}.rs"), "TODO stub", 900))
            .collect();
        let report = QualityGate::default().validate_changes(&changes);
        assert_eq!(report.score, 0.0);
        assert!(!report.passed);
    }

    #[test]
    fn test_workspace_checks() {
        let mut files = HashMap::new();
        files.insert("src/big.rs".to_string(), "x\n".repeat(600));
        files.insert("src/small.rs".to_string(), "x\n".repeat(10));
        let gate = QualityGate::default().with_workspace(Arc::new(MemWorkspace(files)));

        let report = gate.validate_changes(&[
            change("src/big.rs", "tweak", 5),
            change("src/small.rs", "tweak", 5),
            change("src/gone.rs", "tweak", 5),
            change("src/new.rs", "add", 5).with_kind(ChangeKind::Create),
        ]);

        assert!(report.workspace_checked);
        assert_eq!(report.issues_of(IssueType::LargeExistingFile).count(), 1);
        assert_eq!(report.issues_of(IssueType::MissingTargetFile).count(), 1);
        assert_eq!(report.score, 90.0);
    }

    #[test]
    fn test_fs_workspace_reads_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn f() {}\n").unwrap();

        let ws = FsWorkspace::new(dir.path());
        assert!(ws.exists("src/lib.rs"));
        assert!(!ws.exists("src/missing.rs"));
        assert_eq!(ws.read_to_string("src/lib.rs").unwrap(), "pub fn f() {}\n");
    }
}
