//! The four-phase cognitive pipeline.
//!
//! One pipeline instance belongs to one agent. Each call to [`think`] or
//! [`solve`] works on a single task and returns all of its state; nothing
//! carries over between tasks.
//!
//! Provider failures never escape: analyze and generate substitute a
//! locally built fallback, justify falls back to a template.
//!
//! [`think`]: CognitivePipeline::think
//! [`solve`]: CognitivePipeline::solve

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::{
    KnowledgeSearcher, NoopKnowledgeSearcher, ProjectContext, ProjectContextProvider,
    StaticProjectContext,
};
use super::evaluate::{evaluate_option, select_option};
use super::parse::{parse_analysis, parse_options};
use super::phase::{PhaseTracker, ThoughtPhase};
use super::prompts;
use super::provider::{InferenceProvider, ModelHint, ProviderError};
use super::specialization::AgentSpecialization;
use super::types::{
    AgentAnalysis, AgentSolution, AgentThoughts, Complexity, SolutionOption, ThoughtEvent,
    ThoughtProgress,
};
use crate::queue::Task;

const TOTAL_PHASES: u8 = 4;

/// Longest model-written justification kept verbatim.
const MAX_JUSTIFICATION_CHARS: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Options kept from the generate phase.
    pub max_options: usize,
    /// Upper bound on a single inference call.
    #[serde(with = "secs")]
    pub call_timeout: Duration,
    /// Ask the provider to write the justification instead of the template.
    pub justify_with_inference: bool,
    /// File names listed in the analysis prompt.
    pub prompt_file_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_options: 3,
            call_timeout: Duration::from_secs(120),
            justify_with_inference: false,
            prompt_file_limit: 40,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// A specialization-parameterized agent brain.
pub struct CognitivePipeline {
    agent_id: String,
    specialization: AgentSpecialization,
    provider: Arc<dyn InferenceProvider>,
    context: Arc<dyn ProjectContextProvider>,
    knowledge: Arc<dyn KnowledgeSearcher>,
    config: PipelineConfig,
    events: Option<mpsc::UnboundedSender<ThoughtEvent>>,
}

impl CognitivePipeline {
    pub fn new(
        agent_id: impl Into<String>,
        specialization: AgentSpecialization,
        provider: Arc<dyn InferenceProvider>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            specialization,
            provider,
            context: Arc::new(StaticProjectContext::default()),
            knowledge: Arc::new(NoopKnowledgeSearcher),
            config: PipelineConfig::default(),
            events: None,
        }
    }

    pub fn with_context(mut self, context: Arc<dyn ProjectContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearcher>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Send progress events to `tx`. Send failures are ignored.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ThoughtEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn specialization(&self) -> &AgentSpecialization {
        &self.specialization
    }

    /// Analyze the task and generate solution options.
    pub async fn think(&self, task: &Task) -> AgentThoughts {
        let mut tracker = PhaseTracker::new();
        let mut progress = ThoughtProgress {
            total_phases: TOTAL_PHASES,
            ..Default::default()
        };

        self.advance(&mut tracker, task, ThoughtPhase::Analyzing, None);
        let project = match self.context.snapshot().await {
            Ok(project) => project,
            Err(e) => {
                warn!(agent = %self.agent_id, error = %e, "Project context unavailable, continuing without it");
                ProjectContext::default()
            }
        };
        let analysis = self.analyze(task, &project, &mut progress).await;
        progress.completed_phases = 1;

        self.advance(&mut tracker, task, ThoughtPhase::GeneratingOptions, None);
        let options = self.generate_options(task, &analysis, &mut progress).await;
        progress.completed_phases = 2;

        AgentThoughts {
            agent: self.agent_id.clone(),
            task_id: task.id,
            phase: tracker.current(),
            analysis,
            options,
            progress,
            transitions: tracker.into_transitions(),
            standards: project.standards,
        }
    }

    /// Select, justify and evaluate from previously generated thoughts.
    pub async fn propose(&self, task: &Task, thoughts: &AgentThoughts) -> AgentSolution {
        let start = if thoughts.phase == ThoughtPhase::GeneratingOptions {
            thoughts.phase
        } else {
            warn!(
                agent = %self.agent_id,
                task_id = %task.id,
                phase = %thoughts.phase,
                "Proposing from thoughts in an unexpected phase"
            );
            ThoughtPhase::GeneratingOptions
        };
        let mut tracker = PhaseTracker::resume(start, thoughts.transitions.clone());

        let options: Vec<SolutionOption> = if thoughts.options.is_empty() {
            vec![fallback_option(&thoughts.analysis)]
        } else {
            thoughts.options.clone()
        };

        // Select
        self.advance(&mut tracker, task, ThoughtPhase::Selecting, None);
        let index = select_option(&options, &self.specialization.selection, &thoughts.standards)
            .unwrap_or(0);
        let selected = options[index].clone();
        self.emit(ThoughtEvent::OptionSelected {
            agent: self.agent_id.clone(),
            task_id: task.id,
            option_id: selected.id.clone(),
            title: selected.title.clone(),
            confidence: selected.confidence,
        });

        // Justify
        self.advance(&mut tracker, task, ThoughtPhase::Justifying, None);
        let evaluation =
            evaluate_option(&selected, &thoughts.standards, &self.specialization.weights);
        let alternatives: Vec<&SolutionOption> = options
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, o)| o)
            .collect();
        let justification = self.justify(task, &selected, &alternatives, &evaluation).await;

        self.advance(&mut tracker, task, ThoughtPhase::Completed, None);

        let solution = AgentSolution {
            id: Uuid::new_v4().to_string(),
            agent: self.agent_id.clone(),
            specialization: self.specialization.name.clone(),
            task_id: task.id,
            justification,
            evaluation,
            confidence: selected.confidence,
            estimated_minutes: selected.estimated_minutes,
            changes: selected.effective_changes(),
            alternatives_considered: alternatives.len(),
            option: selected,
            created_at: Utc::now(),
        };

        info!(
            agent = %self.agent_id,
            task_id = %task.id,
            option = %solution.option.title,
            confidence = solution.confidence,
            aggregate = solution.evaluation.aggregate,
            "Solution proposed"
        );
        self.emit(ThoughtEvent::SolutionReady {
            agent: self.agent_id.clone(),
            task_id: task.id,
            solution_id: solution.id.clone(),
            aggregate: solution.evaluation.aggregate,
        });
        solution
    }

    /// `think` followed by `propose`.
    pub async fn solve(&self, task: &Task) -> (AgentThoughts, AgentSolution) {
        let thoughts = self.think(task).await;
        let solution = self.propose(task, &thoughts).await;
        (thoughts, solution)
    }

    async fn analyze(
        &self,
        task: &Task,
        project: &ProjectContext,
        progress: &mut ThoughtProgress,
    ) -> AgentAnalysis {
        let query = format!("{} {}", task.title, task.description);
        let knowledge = self.knowledge.search(query.trim()).await;

        let prompt = prompts::analysis_prompt(
            &self.specialization,
            task,
            project,
            &knowledge,
            self.config.prompt_file_limit,
        );
        progress.inference_calls += 1;
        let parsed = match self.call(&prompt, self.hint(task, ThoughtPhase::Analyzing)).await {
            Ok(text) => parse_analysis(&text).ok_or_else(|| {
                ProviderError::InvalidResponse("no problem statement in analysis".to_string())
            }),
            Err(e) => Err(e),
        };

        let mut analysis = match parsed {
            Ok(analysis) => analysis,
            Err(e) => {
                progress.fallbacks += 1;
                self.report_fallback(task, ThoughtPhase::Analyzing, &e);
                fallback_analysis(task, project, self.config.prompt_file_limit)
            }
        };

        for constraint in project.standard_constraints() {
            if !analysis.constraints.contains(&constraint) {
                analysis.constraints.push(constraint);
            }
        }
        if !knowledge.is_empty() {
            let refs: Vec<String> = knowledge.iter().map(|k| k.title.clone()).collect();
            analysis
                .context
                .push_str(&format!(" References: {}.", refs.join(", ")));
        }

        self.emit(ThoughtEvent::AnalysisReady {
            agent: self.agent_id.clone(),
            task_id: task.id,
            problem: analysis.problem.clone(),
            fallback: analysis.fallback,
        });
        analysis
    }

    async fn generate_options(
        &self,
        task: &Task,
        analysis: &AgentAnalysis,
        progress: &mut ThoughtProgress,
    ) -> Vec<SolutionOption> {
        let max = self.config.max_options.max(1);
        let prompt = prompts::options_prompt(&self.specialization, task, analysis, max);
        progress.inference_calls += 1;

        let hint = self.hint(task, ThoughtPhase::GeneratingOptions);
        let routing = format!("{}\n{}", hint.routing_text, analysis.problem.trim());
        let result = match self.call(&prompt, hint.with_routing_text(routing)).await {
            Ok(text) => {
                let options = parse_options(&text, max);
                if options.is_empty() {
                    Err(ProviderError::InvalidResponse(
                        "no solution options in response".to_string(),
                    ))
                } else {
                    Ok(options)
                }
            }
            Err(e) => Err(e),
        };

        let mut options = match result {
            Ok(options) => options,
            Err(e) => {
                progress.fallbacks += 1;
                self.report_fallback(task, ThoughtPhase::GeneratingOptions, &e);
                vec![fallback_option(analysis)]
            }
        };

        // Model-supplied ids are not trusted to be unique.
        let mut seen = std::collections::HashSet::new();
        for option in &mut options {
            if !seen.insert(option.id.clone()) {
                option.id = SolutionOption::new_id();
            }
        }

        self.emit(ThoughtEvent::OptionsGenerated {
            agent: self.agent_id.clone(),
            task_id: task.id,
            count: options.len(),
            viable: options.iter().filter(|o| o.is_viable()).count(),
        });
        options
    }

    async fn justify(
        &self,
        task: &Task,
        selected: &SolutionOption,
        alternatives: &[&SolutionOption],
        evaluation: &super::types::SolutionEvaluation,
    ) -> String {
        let template = prompts::templated_justification(
            &self.specialization,
            selected,
            alternatives.len(),
            evaluation,
        );
        if !self.config.justify_with_inference {
            return template;
        }

        let prompt = prompts::justify_prompt(&self.specialization, task, selected, alternatives);
        match self.call(&prompt, self.hint(task, ThoughtPhase::Justifying)).await {
            Ok(text) if !text.trim().is_empty() => {
                text.trim().chars().take(MAX_JUSTIFICATION_CHARS).collect()
            }
            Ok(_) => template,
            Err(e) => {
                self.report_fallback(task, ThoughtPhase::Justifying, &e);
                template
            }
        }
    }

    fn hint(&self, task: &Task, phase: ThoughtPhase) -> ModelHint {
        ModelHint::new(self.agent_id.clone(), phase, task)
    }

    async fn call(&self, prompt: &str, hint: ModelHint) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.config.call_timeout, self.provider.complete(prompt, &hint))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.config.call_timeout)),
        }
    }

    fn advance(&self, tracker: &mut PhaseTracker, task: &Task, to: ThoughtPhase, note: Option<&str>) {
        let from = tracker.current();
        if let Err(e) = tracker.advance(to, note) {
            warn!(agent = %self.agent_id, task_id = %task.id, error = %e, "Phase tracking out of order");
            return;
        }
        debug!(agent = %self.agent_id, task_id = %task.id, from = %from, to = %to, "Cognition phase");
        self.emit(ThoughtEvent::PhaseChanged {
            agent: self.agent_id.clone(),
            task_id: task.id,
            from,
            to,
        });
    }

    fn report_fallback(&self, task: &Task, phase: ThoughtPhase, error: &ProviderError) {
        warn!(
            agent = %self.agent_id,
            task_id = %task.id,
            phase = %phase,
            error = %error,
            "Inference failed, using fallback"
        );
        self.emit(ThoughtEvent::Fallback {
            agent: self.agent_id.clone(),
            task_id: task.id,
            phase,
            error: error.to_string(),
        });
    }

    fn emit(&self, event: ThoughtEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Best-effort analysis built without a model.
pub fn fallback_analysis(task: &Task, project: &ProjectContext, max_files: usize) -> AgentAnalysis {
    let problem = if !task.description.trim().is_empty() {
        task.description.trim().to_string()
    } else if !task.title.trim().is_empty() {
        task.title.trim().to_string()
    } else {
        format!("Unspecified task {}", task.id.short())
    };
    AgentAnalysis {
        problem,
        context: project.summary(max_files),
        constraints: project.standard_constraints(),
        fallback: true,
    }
}

/// Zero-confidence option produced when no model output is usable.
pub fn fallback_option(analysis: &AgentAnalysis) -> SolutionOption {
    SolutionOption {
        id: SolutionOption::new_id(),
        title: "Manual investigation".to_string(),
        description: format!("No model-generated plan was available for: {}", analysis.problem),
        approach: "Inspect the affected code by hand and apply the smallest change that \
                   addresses the problem, with tests."
            .to_string(),
        pros: vec!["No speculative changes".to_string()],
        cons: vec!["Not reviewed by a model".to_string()],
        estimated_minutes: 60,
        complexity: Complexity::Medium,
        confidence: 0.0,
        files: Vec::new(),
        risks: vec!["Plan produced without inference".to_string()],
        changes: Vec::new(),
    }
}
