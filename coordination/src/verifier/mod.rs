//! Verifier: deterministic quality gate
//!
//! The gate is the only judge of whether a proposed solution is trusted.
//! It is a pure function of the solution's declared changes (plus optional
//! workspace file lookups); no model is involved.
//!
//! # Scoring
//!
//! ```text
//! score = clamp(100 - Σ penalty(issue), 0, 100)
//! passed = score >= min_acceptable_score
//! ```
//!
//! | Issue                    | Severity | Penalty |
//! |--------------------------|----------|---------|
//! | incomplete marker        | critical | 15      |
//! | oversized change         | medium   | 10      |
//! | untyped escape hatch     | low      | 5       |
//! | large existing file      | low      | 5       |
//! | missing target file      | low      | 5       |
//! | missing manifest update  | low      | 0       |
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::verifier::{QualityGate, QualityGateConfig};
//!
//! let gate = QualityGate::new(QualityGateConfig::default());
//! let report = gate.validate(&solution);
//! println!("{}", report.summary());
//! ```

pub mod gate;
pub mod report;

pub use gate::{FsWorkspace, PenaltyTable, QualityGate, QualityGateConfig, WorkspaceReader};
pub use report::{IssueSeverity, IssueType, QualityIssue, QualityReport};
