//! Agent specialization descriptors.
//!
//! A specialization parameterizes the single cognitive pipeline: prompt
//! preambles, evaluation weights and the selection rule. Built-ins cover the
//! common agent roles; custom descriptors load from TOML:
//!
//! ```toml
//! name = "database"
//! focus = "schema design and query performance"
//! capabilities = ["backend", "sql"]
//! analysis_preamble = "You are a database specialist."
//! options_preamble = "Favour migrations that can be rolled back."
//!
//! [weights]
//! performance = 2.0
//!
//! [selection]
//! rule = "prefer_dimension"
//! dimension = "performance"
//! tie_window = 0.1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::evaluate::EvaluationDimension;
use super::types::SolutionEvaluation;

/// Error type for specialization loading
#[derive(Debug, thiserror::Error)]
pub enum SpecializationError {
    #[error("Unknown built-in specialization: {0}")]
    UnknownBuiltin(String),

    #[error("Failed to read specialization file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse specialization: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid specialization: {0}")]
    Invalid(String),
}

/// Result type for specialization loading
pub type SpecializationResult<T> = Result<T, SpecializationError>;

/// Non-negative per-dimension weights for the aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationWeights {
    pub quality: f64,
    pub performance: f64,
    pub security: f64,
    pub maintainability: f64,
    pub compliance: f64,
}

impl Default for EvaluationWeights {
    fn default() -> Self {
        Self {
            quality: 1.0,
            performance: 1.0,
            security: 1.0,
            maintainability: 1.0,
            compliance: 1.0,
        }
    }
}

impl EvaluationWeights {
    fn all(&self) -> [f64; 5] {
        [
            self.quality,
            self.performance,
            self.security,
            self.maintainability,
            self.compliance,
        ]
    }

    /// Weighted mean of the five dimensions. Falls back to the plain mean
    /// when every weight is zero.
    pub fn aggregate(&self, eval: &SolutionEvaluation) -> f64 {
        let scores = [
            eval.quality,
            eval.performance,
            eval.security,
            eval.maintainability,
            eval.compliance,
        ];
        let weights = self.all();
        let total: f64 = weights.iter().sum();
        if total <= f64::EPSILON {
            return scores.iter().sum::<f64>() / scores.len() as f64;
        }
        let weighted: f64 = scores.iter().zip(weights).map(|(s, w)| s * w).sum();
        (weighted / total).clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> SpecializationResult<()> {
        if self.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SpecializationError::Invalid(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the select phase picks among generated options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SelectionRule {
    /// Highest confidence wins.
    #[default]
    MaxConfidence,
    /// Among options within `tie_window` of the top confidence, the best
    /// score on `dimension` wins.
    PreferDimension {
        dimension: EvaluationDimension,
        tie_window: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpecialization {
    pub name: String,
    pub focus: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub analysis_preamble: String,
    #[serde(default)]
    pub options_preamble: String,
    #[serde(default)]
    pub weights: EvaluationWeights,
    #[serde(default)]
    pub selection: SelectionRule,
}

pub const BUILTIN_SPECIALIZATIONS: &[&str] =
    &["general", "backend", "frontend", "qa", "security", "architect"];

impl AgentSpecialization {
    fn base(name: &str, focus: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            focus: focus.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            analysis_preamble: format!("You are a software engineer focused on {focus}."),
            options_preamble: String::new(),
            weights: EvaluationWeights::default(),
            selection: SelectionRule::MaxConfidence,
        }
    }

    pub fn general() -> Self {
        Self::base("general", "general software development", &["general"])
    }

    pub fn backend() -> Self {
        let mut s = Self::base(
            "backend",
            "services, data access and APIs",
            &["general", "backend"],
        );
        s.options_preamble =
            "Prefer approaches with predictable latency and explicit error handling.".to_string();
        s.weights.performance = 1.5;
        s.weights.security = 1.25;
        s
    }

    pub fn frontend() -> Self {
        let mut s = Self::base(
            "frontend",
            "user interfaces and client-side state",
            &["general", "frontend"],
        );
        s.options_preamble = "Prefer small, composable components.".to_string();
        s.weights.maintainability = 1.5;
        s
    }

    pub fn qa() -> Self {
        let mut s = Self::base("qa", "testing and verification", &["general", "qa", "test"]);
        s.options_preamble =
            "Every option must say how it will be tested. Reject options without tests."
                .to_string();
        s.weights.compliance = 2.0;
        s.weights.quality = 1.5;
        s.selection = SelectionRule::PreferDimension {
            dimension: EvaluationDimension::Compliance,
            tie_window: 0.1,
        };
        s
    }

    pub fn security() -> Self {
        let mut s = Self::base(
            "security",
            "security hardening and threat mitigation",
            &["general", "security"],
        );
        s.options_preamble =
            "List every security risk explicitly. Prefer the option with the smallest attack surface."
                .to_string();
        s.weights.security = 2.0;
        s.selection = SelectionRule::PreferDimension {
            dimension: EvaluationDimension::Security,
            tie_window: 0.1,
        };
        s
    }

    pub fn architect() -> Self {
        let mut s = Self::base(
            "architect",
            "system structure and long-term maintainability",
            &["general", "architecture", "backend"],
        );
        s.options_preamble = "Consider module boundaries and migration cost.".to_string();
        s.weights.maintainability = 2.0;
        s.selection = SelectionRule::PreferDimension {
            dimension: EvaluationDimension::Maintainability,
            tie_window: 0.15,
        };
        s
    }

    /// Look up a built-in by name (case-insensitive).
    pub fn builtin(name: &str) -> SpecializationResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::general()),
            "backend" => Ok(Self::backend()),
            "frontend" => Ok(Self::frontend()),
            "qa" | "test" | "testing" => Ok(Self::qa()),
            "security" => Ok(Self::security()),
            "architect" | "architecture" => Ok(Self::architect()),
            other => Err(SpecializationError::UnknownBuiltin(other.to_string())),
        }
    }

    pub fn from_toml_str(s: &str) -> SpecializationResult<Self> {
        let spec: Self = toml::from_str(s)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: &Path) -> SpecializationResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> SpecializationResult<()> {
        if self.name.trim().is_empty() {
            return Err(SpecializationError::Invalid("name is empty".to_string()));
        }
        self.weights.validate()?;
        if let SelectionRule::PreferDimension { tie_window, .. } = self.selection {
            if !(0.0..=1.0).contains(&tie_window) {
                return Err(SpecializationError::Invalid(format!(
                    "tie_window {tie_window} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

impl Default for AgentSpecialization {
    fn default() -> Self {
        Self::general()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(q: f64, p: f64, s: f64, m: f64, c: f64) -> SolutionEvaluation {
        SolutionEvaluation {
            quality: q,
            performance: p,
            security: s,
            maintainability: m,
            compliance: c,
            aggregate: 0.0,
        }
    }

    #[test]
    fn test_all_builtins_resolve_and_validate() {
        for name in BUILTIN_SPECIALIZATIONS {
            let spec = AgentSpecialization::builtin(name).unwrap();
            assert_eq!(spec.name, *name);
            spec.validate().unwrap();
        }
        assert!(matches!(
            AgentSpecialization::builtin("wizard"),
            Err(SpecializationError::UnknownBuiltin(_))
        ));
    }

    #[test]
    fn test_security_weighting_raises_security_influence() {
        let e = eval(0.5, 0.5, 1.0, 0.5, 0.5);
        let neutral = EvaluationWeights::default().aggregate(&e);
        let security = AgentSpecialization::security().weights.aggregate(&e);
        assert!(security > neutral);
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        let weights = EvaluationWeights {
            quality: 0.0,
            performance: 0.0,
            security: 0.0,
            maintainability: 0.0,
            compliance: 0.0,
        };
        let agg = weights.aggregate(&eval(1.0, 0.0, 1.0, 0.0, 0.5));
        assert!((agg - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_from_toml() {
        let spec = AgentSpecialization::from_toml_str(
            r#"
            name = "database"
            focus = "schema design"
            capabilities = ["backend", "sql"]

            [weights]
            performance = 2.0

            [selection]
            rule = "prefer_dimension"
            dimension = "performance"
            tie_window = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(spec.name, "database");
        assert_eq!(spec.weights.performance, 2.0);
        assert_eq!(spec.weights.quality, 1.0);
        assert_eq!(
            spec.selection,
            SelectionRule::PreferDimension {
                dimension: EvaluationDimension::Performance,
                tie_window: 0.1
            }
        );
    }

    #[test]
    fn test_from_toml_rejects_negative_weight() {
        let err = AgentSpecialization::from_toml_str(
            r#"
            name = "x"
            focus = "y"
            [weights]
            security = -1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SpecializationError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.toml");
        std::fs::write(&path, "name = \"docs\"\nfocus = \"documentation\"\n").unwrap();
        let spec = AgentSpecialization::from_file(&path).unwrap();
        assert_eq!(spec.selection, SelectionRule::MaxConfidence);
    }
}
