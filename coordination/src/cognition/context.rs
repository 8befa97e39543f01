//! Project context and knowledge capabilities.
//!
//! The pipeline reads a [`ProjectContext`] snapshot once per task. Snapshots
//! come from a [`ProjectContextProvider`]: either a fixed value
//! ([`StaticProjectContext`]) or a scan of a directory tree
//! ([`WorkspaceScanner`]).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

/// Error type for context collection
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Workspace root not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Scan failed: {0}")]
    ScanFailed(String),
}

/// Result type for context collection
pub type ContextResult<T> = Result<T, ContextError>;

/// File names treated as program entry points.
const ENTRY_POINT_NAMES: &[&str] = &[
    "main.rs", "lib.rs", "index.ts", "index.js", "main.ts", "main.py", "__main__.py", "app.py",
    "main.go",
];

/// Coding standards the project expects proposals to honour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodingStandards {
    pub max_file_lines: usize,
    /// Changes to source files should come with test changes.
    pub require_tests: bool,
    /// Untyped escape hatches (`any`, `unsafe` casts, ...) are not allowed.
    pub forbid_untyped: bool,
    pub naming_convention: String,
    pub notes: Vec<String>,
}

impl Default for CodingStandards {
    fn default() -> Self {
        Self {
            max_file_lines: 500,
            require_tests: true,
            forbid_untyped: true,
            naming_convention: "snake_case".to_string(),
            notes: Vec::new(),
        }
    }
}

/// Read-only snapshot of the project an agent is working in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectContext {
    pub files: Vec<String>,
    pub directories: Vec<String>,
    pub entry_points: Vec<String>,
    pub patterns: Vec<String>,
    pub standards: CodingStandards,
}

impl ProjectContext {
    /// Whether there is anything beyond default standards to go on.
    pub fn is_minimal(&self) -> bool {
        self.files.is_empty() && self.entry_points.is_empty() && self.patterns.is_empty()
    }

    /// Compact text rendering for prompts.
    pub fn summary(&self, max_files: usize) -> String {
        if self.is_minimal() {
            return "No project structure available.".to_string();
        }

        let mut out = format!(
            "{} files in {} directories.",
            self.files.len(),
            self.directories.len()
        );
        if !self.entry_points.is_empty() {
            out.push_str(&format!(" Entry points: {}.", self.entry_points.join(", ")));
        }
        if !self.patterns.is_empty() {
            out.push_str(&format!(" Patterns: {}.", self.patterns.join(", ")));
        }
        if !self.files.is_empty() && max_files > 0 {
            let shown: Vec<&str> = self.files.iter().take(max_files).map(String::as_str).collect();
            out.push_str(&format!(" Files: {}", shown.join(", ")));
            if self.files.len() > max_files {
                out.push_str(&format!(" (+{} more)", self.files.len() - max_files));
            }
            out.push('.');
        }
        out
    }

    /// Standards rendered as constraint lines.
    pub fn standard_constraints(&self) -> Vec<String> {
        let s = &self.standards;
        let mut constraints = vec![format!("Keep files under {} lines", s.max_file_lines)];
        if s.require_tests {
            constraints.push("Source changes must include tests".to_string());
        }
        if s.forbid_untyped {
            constraints.push("No untyped escape hatches".to_string());
        }
        if !s.naming_convention.is_empty() {
            constraints.push(format!("Follow {} naming", s.naming_convention));
        }
        constraints.extend(s.notes.iter().cloned());
        constraints
    }
}

/// Supplies project snapshots to the pipeline.
#[async_trait]
pub trait ProjectContextProvider: Send + Sync {
    async fn snapshot(&self) -> ContextResult<ProjectContext>;
}

/// A fixed snapshot, for tests and for callers that already know the layout.
#[derive(Debug, Clone, Default)]
pub struct StaticProjectContext(pub ProjectContext);

#[async_trait]
impl ProjectContextProvider for StaticProjectContext {
    async fn snapshot(&self) -> ContextResult<ProjectContext> {
        Ok(self.0.clone())
    }
}

/// Builds a [`ProjectContext`] by walking a directory, honouring
/// `.gitignore` and skipping hidden entries.
#[derive(Debug, Clone)]
pub struct WorkspaceScanner {
    root: PathBuf,
    max_files: usize,
    standards: CodingStandards,
}

impl WorkspaceScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_files: 2_000,
            standards: CodingStandards::default(),
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_standards(mut self, standards: CodingStandards) -> Self {
        self.standards = standards;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Blocking scan of the workspace.
    pub fn scan(&self) -> ContextResult<ProjectContext> {
        if !self.root.is_dir() {
            return Err(ContextError::RootNotFound(self.root.clone()));
        }

        let mut files = Vec::new();
        let mut directories = BTreeSet::new();
        let mut entry_points = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let rel = relative.to_string_lossy().replace('\\', "/");

            if path.is_dir() {
                directories.insert(rel);
                continue;
            }
            if files.len() >= self.max_files {
                continue;
            }

            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if ENTRY_POINT_NAMES.contains(&name) {
                entry_points.push(rel.clone());
            }
            files.push(rel);
        }

        files.sort();
        entry_points.sort();
        let directories: Vec<String> = directories.into_iter().collect();
        let mut patterns = detect_patterns(&files, &directories);
        // Hidden entries are skipped by the walk, so CI config is probed directly.
        if self.root.join(".github").join("workflows").is_dir()
            || self.root.join(".gitlab-ci.yml").is_file()
        {
            patterns.push("ci-config".to_string());
        }

        Ok(ProjectContext {
            files,
            directories,
            entry_points,
            patterns,
            standards: self.standards.clone(),
        })
    }
}

#[async_trait]
impl ProjectContextProvider for WorkspaceScanner {
    async fn snapshot(&self) -> ContextResult<ProjectContext> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| ContextError::ScanFailed(e.to_string()))?
    }
}

fn detect_patterns(files: &[String], directories: &[String]) -> Vec<String> {
    let has_file = |name: &str| files.iter().any(|f| f == name || f.ends_with(&format!("/{name}")));
    let has_dir = |name: &str| {
        directories
            .iter()
            .any(|d| d == name || d.ends_with(&format!("/{name}")))
    };

    let mut patterns = Vec::new();
    if has_file("Cargo.toml") {
        let manifests = files.iter().filter(|f| f.ends_with("Cargo.toml")).count();
        patterns.push(if manifests > 1 {
            "cargo-workspace".to_string()
        } else {
            "cargo-crate".to_string()
        });
    }
    if has_file("package.json") {
        patterns.push("node-package".to_string());
    }
    if has_file("pyproject.toml") || has_file("requirements.txt") {
        patterns.push("python-project".to_string());
    }
    if has_dir("tests") || has_dir("test") || has_dir("__tests__") {
        patterns.push("tests-directory".to_string());
    }
    patterns
}

/// One result from a knowledge search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub source: String,
    pub title: String,
    pub summary: String,
}

/// External documentation/knowledge lookup.
#[async_trait]
pub trait KnowledgeSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Vec<KnowledgeSnippet>;
}

/// Searcher that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopKnowledgeSearcher;

#[async_trait]
impl KnowledgeSearcher for NoopKnowledgeSearcher {
    async fn search(&self, _query: &str) -> Vec<KnowledgeSnippet> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_finds_files_entry_points_and_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"").unwrap();
        fs::write(src.join("main.rs"), "fn main() {}").unwrap();
        fs::write(src.join("util.rs"), "pub fn f() {}").unwrap();
        fs::write(dir.path().join("tests").join("it.rs"), "").unwrap();

        let ctx = WorkspaceScanner::new(dir.path()).scan().unwrap();

        assert_eq!(ctx.files.len(), 4);
        assert_eq!(ctx.entry_points, vec!["src/main.rs".to_string()]);
        assert!(ctx.directories.contains(&"src".to_string()));
        assert!(ctx.patterns.contains(&"cargo-crate".to_string()));
        assert!(ctx.patterns.contains(&"tests-directory".to_string()));
    }

    #[test]
    fn test_scan_skips_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join(".cache").join("blob"), "x").unwrap();
        fs::write(dir.path().join("README.md"), "# hi").unwrap();

        let ctx = WorkspaceScanner::new(dir.path()).scan().unwrap();
        assert_eq!(ctx.files, vec!["README.md".to_string()]);
    }

    #[test]
    fn test_scan_detects_ci_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".github").join("workflows")).unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();

        let ctx = WorkspaceScanner::new(dir.path()).scan().unwrap();
        assert_eq!(ctx.patterns, vec!["node-package".to_string(), "ci-config".to_string()]);
    }

    #[test]
    fn test_scan_respects_max_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{i}.txt")), "").unwrap();
        }
        let ctx = WorkspaceScanner::new(dir.path())
            .with_max_files(3)
            .scan()
            .unwrap();
        assert_eq!(ctx.files.len(), 3);
    }

    #[test]
    fn test_scan_missing_root_errors() {
        let err = WorkspaceScanner::new("/definitely/not/here").scan().unwrap_err();
        assert!(matches!(err, ContextError::RootNotFound(_)));
    }

    #[test]
    fn test_summary_for_minimal_context() {
        let ctx = ProjectContext::default();
        assert!(ctx.is_minimal());
        assert_eq!(ctx.summary(10), "No project structure available.");
    }

    #[test]
    fn test_summary_truncates_file_list() {
        let ctx = ProjectContext {
            files: (0..5).map(|i| format!("f{i}.rs")).collect(),
            ..Default::default()
        };
        let summary = ctx.summary(2);
        assert!(summary.contains("f0.rs, f1.rs"));
        assert!(summary.contains("(+3 more)"));
    }

    #[test]
    fn test_standard_constraints() {
        let ctx = ProjectContext::default();
        let constraints = ctx.standard_constraints();
        assert!(constraints.iter().any(|c| c.contains("500 lines")));
        assert!(constraints.iter().any(|c| c.contains("tests")));
    }

    #[tokio::test]
    async fn test_noop_searcher_finds_nothing() {
        assert!(NoopKnowledgeSearcher.search("tokio mutex").await.is_empty());
    }
}
