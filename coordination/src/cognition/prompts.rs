//! Prompt rendering for the analyze, generate and justify phases.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever the templates change so
//! responses can be traced back to the prompt that produced them.

use super::context::{KnowledgeSnippet, ProjectContext};
use super::specialization::AgentSpecialization;
use super::types::{AgentAnalysis, SolutionEvaluation, SolutionOption};
use crate::queue::Task;

/// Prompt version. Bump on any template change.
pub const PROMPT_VERSION: &str = "1.2.0";

const ANALYSIS_INSTRUCTIONS: &str = "\
Analyze the task below before anyone writes code.

Respond with a single JSON object and nothing else:
{\"problem\": \"<one-paragraph problem statement>\", \
\"context\": \"<relevant project context>\", \
\"constraints\": [\"<constraint>\", ...]}";

const OPTIONS_INSTRUCTIONS: &str = "\
Propose between 1 and {max} distinct solution options for the analysis below.

Respond with a single JSON object and nothing else:
{\"options\": [{\"title\": \"...\", \"description\": \"...\", \"approach\": \"...\", \
\"pros\": [\"...\"], \"cons\": [\"...\"], \"estimated_minutes\": 30, \
\"complexity\": \"low|medium|high\", \"confidence\": 0.0-1.0, \
\"files\": [\"path\"], \"risks\": [\"...\"], \
\"changes\": [{\"path\": \"...\", \"description\": \"...\", \"estimated_lines\": 20, \
\"kind\": \"create|modify|delete\"}]}]}

Confidence above 0.5 means you would ship the option. Use 0.5 or below for \
options you include only to explain why they should be rejected. Never describe \
a change as a placeholder or stub.";

const JUSTIFY_INSTRUCTIONS: &str = "\
In at most three sentences, explain why the selected option is the right choice \
over the alternatives. Plain text only.";

fn task_block(task: &Task) -> String {
    let description = if task.description.trim().is_empty() {
        "(no description provided)"
    } else {
        task.description.trim()
    };
    format!(
        "## Task\nTitle: {}\nPriority: {}\nKind: {}\nDescription: {}",
        task.title, task.priority, task.kind, description
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "- none".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn analysis_prompt(
    spec: &AgentSpecialization,
    task: &Task,
    project: &ProjectContext,
    knowledge: &[KnowledgeSnippet],
    max_files: usize,
) -> String {
    let mut prompt = format!(
        "{}\n\n{}\n\n## Project\n{}\n\n## Standards\n{}",
        spec.analysis_preamble,
        task_block(task),
        project.summary(max_files),
        bullet_list(&project.standard_constraints()),
    );
    if !knowledge.is_empty() {
        prompt.push_str("\n\n## Reference material\n");
        for k in knowledge {
            prompt.push_str(&format!("- {} ({}): {}\n", k.title, k.source, k.summary));
        }
    }
    prompt.push_str("\n\n");
    prompt.push_str(ANALYSIS_INSTRUCTIONS);
    prompt
}

pub fn options_prompt(
    spec: &AgentSpecialization,
    task: &Task,
    analysis: &AgentAnalysis,
    max_options: usize,
) -> String {
    let mut prompt = format!(
        "{}\n\n{}\n\n## Analysis\nProblem: {}\nContext: {}\nConstraints:\n{}\n\n",
        spec.analysis_preamble,
        task_block(task),
        analysis.problem,
        analysis.context,
        bullet_list(&analysis.constraints),
    );
    if !spec.options_preamble.is_empty() {
        prompt.push_str(&spec.options_preamble);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&OPTIONS_INSTRUCTIONS.replace("{max}", &max_options.to_string()));
    prompt
}

pub fn justify_prompt(
    spec: &AgentSpecialization,
    task: &Task,
    selected: &SolutionOption,
    alternatives: &[&SolutionOption],
) -> String {
    let others = alternatives
        .iter()
        .map(|o| format!("- {} (confidence {:.2})", o.title, o.confidence))
        .collect::<Vec<_>>();
    format!(
        "{}\n\n{}\n\n## Selected\n{} (confidence {:.2}): {}\n\n## Alternatives\n{}\n\n{}",
        spec.analysis_preamble,
        task_block(task),
        selected.title,
        selected.confidence,
        selected.approach,
        bullet_list(&others),
        JUSTIFY_INSTRUCTIONS,
    )
}

/// Deterministic justification used when no model is asked, or when the
/// model's answer is unusable.
pub fn templated_justification(
    spec: &AgentSpecialization,
    selected: &SolutionOption,
    alternatives: usize,
    evaluation: &SolutionEvaluation,
) -> String {
    let basis = match &spec.selection {
        super::specialization::SelectionRule::MaxConfidence => "highest confidence".to_string(),
        super::specialization::SelectionRule::PreferDimension { dimension, .. } => {
            format!("best {dimension} score among the leading options")
        }
    };
    let mut text = format!(
        "Selected \"{}\" ({} complexity, confidence {:.2}) for its {basis}",
        selected.title, selected.complexity, selected.confidence
    );
    if alternatives > 0 {
        text.push_str(&format!(" over {alternatives} alternative(s)"));
    }
    text.push_str(&format!(
        ". The {} agent rates it {:.2} overall.",
        spec.name, evaluation.aggregate
    ));
    if let Some(pro) = selected.pros.first() {
        text.push_str(&format!(" Main strength: {pro}."));
    }
    if let Some(risk) = selected.risks.first() {
        text.push_str(&format!(" Main risk: {risk}."));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::types::Complexity;

    fn option() -> SolutionOption {
        SolutionOption {
            id: "opt-1".into(),
            title: "Add index".into(),
            description: "d".into(),
            approach: "create an index".into(),
            pros: vec!["fast".into()],
            cons: vec![],
            estimated_minutes: 20,
            complexity: Complexity::Low,
            confidence: 0.8,
            files: vec![],
            risks: vec!["lock contention".into()],
            changes: vec![],
        }
    }

    #[test]
    fn test_analysis_prompt_handles_empty_description() {
        let task = Task::new("Fix it", "");
        let prompt = analysis_prompt(
            &AgentSpecialization::general(),
            &task,
            &ProjectContext::default(),
            &[],
            10,
        );
        assert!(prompt.contains("(no description provided)"));
        assert!(prompt.contains("No project structure available."));
        assert!(prompt.contains("\"problem\""));
    }

    #[test]
    fn test_options_prompt_includes_max_and_preamble() {
        let task = Task::new("t", "d");
        let prompt = options_prompt(
            &AgentSpecialization::security(),
            &task,
            &AgentAnalysis::default(),
            4,
        );
        assert!(prompt.contains("between 1 and 4"));
        assert!(prompt.contains("attack surface"));
    }

    #[test]
    fn test_templated_justification_mentions_selection_basis() {
        let eval = SolutionEvaluation {
            quality: 0.8,
            performance: 0.8,
            security: 0.8,
            maintainability: 0.8,
            compliance: 0.8,
            aggregate: 0.8,
        };
        let text =
            templated_justification(&AgentSpecialization::security(), &option(), 2, &eval);
        assert!(text.contains("best security score"));
        assert!(text.contains("over 2 alternative(s)"));
        assert!(text.contains("Main risk: lock contention."));
    }
}
