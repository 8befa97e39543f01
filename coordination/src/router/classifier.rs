//! Prompt complexity classifier.
//!
//! Runs BEFORE the router applies budget and policy overrides. Purely
//! lexical: each signal that matches adds to a 0-10 score which maps to a
//! suggested tier. Some signals force the premium tier outright.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::tier::ModelTier;

/// Complexity level of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

impl ComplexityLevel {
    pub fn suggested_tier(&self) -> ModelTier {
        match self {
            Self::Simple => ModelTier::Local,
            Self::Moderate => ModelTier::Cloud,
            Self::Complex => ModelTier::Premium,
        }
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityEstimate {
    pub level: ComplexityLevel,
    /// 0-10
    pub score: u8,
    /// Names of matched signals, in match order
    pub signals: Vec<String>,
    /// A signal demanded the premium tier regardless of policy
    pub force_premium: bool,
    /// Rough prompt size in tokens (chars / 4)
    pub prompt_tokens: u64,
}

struct Signal {
    name: &'static str,
    pattern: Regex,
    weight: u8,
    force_premium: bool,
}

/// Prompts longer than this add the `long_prompt` signal.
const LONG_PROMPT_CHARS: usize = 4_000;
/// Mentions of at least this many distinct file paths add `many_files`.
const MANY_FILES: usize = 3;
/// Mentions of at least this many files make a refactor "large".
const LARGE_REFACTOR_FILES: usize = 5;

pub struct PromptClassifier {
    signals: Vec<Signal>,
    file_path: Option<Regex>,
}

impl PromptClassifier {
    pub fn new() -> Self {
        let table: &[(&'static str, &str, u8, bool)] = &[
            ("refactor", r"(?i)\b(refactor(ing|s)?|restructur(e|ing)|rewrite)\b", 2, false),
            (
                "architecture",
                r"(?i)\b(architect(ure|ural)?|system design|redesign|overhaul)\b",
                3,
                true,
            ),
            (
                "multi_file",
                r"(?i)\b(multiple files|multi-file|across (the )?(codebase|modules|files|crates)|several modules)\b",
                2,
                false,
            ),
            (
                "consolidation",
                r"(?i)\b(consolidat(e|ion|ing)|merge|merging|deduplicat(e|ion)|unify)\b",
                3,
                true,
            ),
            (
                "concurrency",
                r"(?i)\b(concurren(t|cy)|race condition|deadlock|lock-free|atomic)\b",
                2,
                false,
            ),
            ("security", r"(?i)\b(security|vulnerab\w*|auth(entication|orization)?|crypto\w*)\b", 2, false),
            ("migration", r"(?i)\b(migrat(e|ion)|schema change|breaking change)\b", 2, false),
        ];
        let signals = table
            .iter()
            .filter_map(|(name, pattern, weight, force)| {
                Regex::new(pattern).ok().map(|pattern| Signal {
                    name: *name,
                    pattern,
                    weight: *weight,
                    force_premium: *force,
                })
            })
            .collect();

        Self {
            signals,
            file_path: Regex::new(r"\b[\w./-]+\.(rs|ts|tsx|js|py|go|java|toml|json|ya?ml)\b").ok(),
        }
    }

    pub fn classify(&self, prompt: &str) -> ComplexityEstimate {
        let mut score: u32 = 0;
        let mut signals = Vec::new();
        let mut force_premium = false;

        for signal in &self.signals {
            if signal.pattern.is_match(prompt) {
                score += u32::from(signal.weight);
                signals.push(signal.name.to_string());
                force_premium |= signal.force_premium;
            }
        }

        let mut files: Vec<&str> = self
            .file_path
            .iter()
            .flat_map(|re| re.find_iter(prompt).map(|m| m.as_str()))
            .collect();
        files.sort_unstable();
        files.dedup();
        if files.len() >= MANY_FILES {
            score += 2;
            signals.push("many_files".to_string());
        }
        if files.len() >= LARGE_REFACTOR_FILES && signals.iter().any(|s| s == "refactor") {
            signals.push("large_refactor".to_string());
            force_premium = true;
        }

        if prompt.chars().count() > LONG_PROMPT_CHARS {
            score += 1;
            signals.push("long_prompt".to_string());
        }

        let score = score.min(10) as u8;
        let level = match score {
            0..=1 => ComplexityLevel::Simple,
            2..=4 => ComplexityLevel::Moderate,
            _ => ComplexityLevel::Complex,
        };

        ComplexityEstimate {
            level,
            score,
            signals,
            force_premium,
            prompt_tokens: (prompt.chars().count() as u64).div_ceil(4),
        }
    }
}

impl Default for PromptClassifier {
    fn default() -> Self {
        Self::new()
    }
}
