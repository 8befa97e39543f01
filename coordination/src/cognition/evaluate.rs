//! Deterministic scoring of solution options.
//!
//! Every score is a pure function of the option's declared properties and
//! the project's coding standards, clamped to [0, 1].

use serde::{Deserialize, Serialize};

use super::context::CodingStandards;
use super::specialization::{EvaluationWeights, SelectionRule};
use super::types::{Complexity, SolutionEvaluation, SolutionOption};

const SECURITY_TERMS: &[&str] = &[
    "security",
    "auth",
    "injection",
    "secret",
    "credential",
    "permission",
    "xss",
    "csrf",
    "unsafe",
    "vulnerab",
    "exploit",
    "leak",
];

const UNTYPED_TERMS: &[&str] = &[": any", "as any", "<any>", "untyped", "type: ignore", "transmute"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationDimension {
    Quality,
    Performance,
    Security,
    Maintainability,
    Compliance,
}

impl std::fmt::Display for EvaluationDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quality => write!(f, "quality"),
            Self::Performance => write!(f, "performance"),
            Self::Security => write!(f, "security"),
            Self::Maintainability => write!(f, "maintainability"),
            Self::Compliance => write!(f, "compliance"),
        }
    }
}

impl SolutionEvaluation {
    pub fn dimension(&self, dimension: EvaluationDimension) -> f64 {
        match dimension {
            EvaluationDimension::Quality => self.quality,
            EvaluationDimension::Performance => self.performance,
            EvaluationDimension::Security => self.security,
            EvaluationDimension::Maintainability => self.maintainability,
            EvaluationDimension::Compliance => self.compliance,
        }
    }
}

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn mentions_any(text: &str, terms: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    terms.iter().any(|t| lower.contains(t))
}

/// Score one option on all five dimensions and weight the aggregate.
pub fn evaluate_option(
    option: &SolutionOption,
    standards: &CodingStandards,
    weights: &EvaluationWeights,
) -> SolutionEvaluation {
    let risk_count = option.risks.len().min(5) as f64;
    let security_risks = option
        .risks
        .iter()
        .filter(|r| mentions_any(r, SECURITY_TERMS))
        .count() as f64;
    let other_risks = risk_count - security_risks.min(risk_count);

    let quality = clamp01(0.4 + 0.6 * clamp01(option.confidence) - 0.05 * risk_count);

    let complexity_base = match option.complexity {
        Complexity::Low => 0.9,
        Complexity::Medium => 0.75,
        Complexity::High => 0.6,
    };
    let performance = clamp01(complexity_base - 0.05 * option.cons.len().min(4) as f64);

    let security = clamp01(0.95 - 0.2 * security_risks - 0.02 * other_risks);

    let touched = option.touched_paths().len();
    let complexity_drag = match option.complexity {
        Complexity::Low => 0.0,
        Complexity::Medium => 0.1,
        Complexity::High => 0.2,
    };
    let maintainability =
        clamp01(0.95 - 0.05 * touched.saturating_sub(1) as f64 - complexity_drag);

    let compliance = clamp01(compliance_score(option, standards));

    let mut evaluation = SolutionEvaluation {
        quality,
        performance,
        security,
        maintainability,
        compliance,
        aggregate: 0.0,
    };
    evaluation.aggregate = weights.aggregate(&evaluation);
    evaluation
}

fn compliance_score(option: &SolutionOption, standards: &CodingStandards) -> f64 {
    let changes = option.effective_changes();
    let mut score: f64 = 0.95;

    if standards.require_tests {
        let has_source = changes.iter().any(|c| !c.is_test() && !c.is_manifest());
        let has_tests = changes.iter().any(|c| c.is_test());
        if has_source && !has_tests {
            score -= 0.35;
        }
    }

    if standards.forbid_untyped {
        let text = std::iter::once(option.approach.as_str())
            .chain(std::iter::once(option.description.as_str()))
            .chain(changes.iter().map(|c| c.description.as_str()))
            .collect::<Vec<_>>()
            .join("\n");
        if mentions_any(&text, UNTYPED_TERMS) {
            score -= 0.2;
        }
    }

    let oversized = changes
        .iter()
        .any(|c| c.estimated_lines as usize > standards.max_file_lines);
    if oversized {
        score -= 0.1;
    }
    score
}

fn max_confidence_index(options: &[SolutionOption]) -> Option<usize> {
    options.iter().enumerate().fold(None, |best, (i, option)| match best {
        Some(b) if options[b].confidence >= option.confidence => Some(b),
        _ => Some(i),
    })
}

/// Pick an option index according to `rule`. Pure and deterministic:
/// ties resolve to the earliest option.
pub fn select_option(
    options: &[SolutionOption],
    rule: &SelectionRule,
    standards: &CodingStandards,
) -> Option<usize> {
    match rule {
        SelectionRule::MaxConfidence => max_confidence_index(options),
        SelectionRule::PreferDimension {
            dimension,
            tie_window,
        } => {
            let top = options[max_confidence_index(options)?].confidence;
            let window = tie_window.max(0.0);
            let neutral = EvaluationWeights::default();

            let mut best: Option<(usize, f64)> = None;
            for (i, option) in options.iter().enumerate() {
                if option.confidence + 1e-9 < top - window {
                    continue;
                }
                let score = evaluate_option(option, standards, &neutral).dimension(*dimension);
                best = match best {
                    None => Some((i, score)),
                    Some((b, bs)) => {
                        let better = score > bs + 1e-9
                            || ((score - bs).abs() <= 1e-9
                                && option.confidence > options[b].confidence);
                        if better {
                            Some((i, score))
                        } else {
                            Some((b, bs))
                        }
                    }
                };
            }
            best.map(|(i, _)| i)
        }
    }
}
