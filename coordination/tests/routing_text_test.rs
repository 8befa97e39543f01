//! Tier selection for pipeline calls depends on the task, not on the prompt
//! scaffolding around it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coordination::cognition::{
    AgentSpecialization, CognitivePipeline, InferenceProvider, ModelHint, PipelineConfig,
    ProjectContext, ProviderError, ProviderResult, StaticProjectContext, ThoughtPhase,
};
use coordination::queue::Task;
use coordination::router::{CostAwareRouter, ModelTier, RouterConfig};

/// Records every call and fails it, so the pipeline runs every phase on
/// fallbacks.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, ModelHint)>>,
}

#[async_trait]
impl InferenceProvider for Recorder {
    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), hint.clone()));
        Err(ProviderError::Unavailable("recording only".into()))
    }
}

fn seven_file_project() -> ProjectContext {
    ProjectContext {
        files: [
            "src/main.rs",
            "src/lib.rs",
            "src/config.rs",
            "src/server.rs",
            "README.md",
            "tests/api_test.rs",
            "Cargo.toml",
        ]
        .iter()
        .map(|f| f.to_string())
        .collect(),
        directories: vec!["src".into(), "tests".into()],
        ..Default::default()
    }
}

async fn recorded_calls(task: &Task, spec: AgentSpecialization) -> Vec<(String, ModelHint)> {
    let recorder = Arc::new(Recorder::default());
    let pipeline = CognitivePipeline::new("sec-1", spec, recorder.clone())
        .with_context(Arc::new(StaticProjectContext(seven_file_project())))
        .with_config(PipelineConfig {
            justify_with_inference: true,
            ..Default::default()
        });
    pipeline.solve(task).await;
    let calls = recorder.calls.lock().unwrap().clone();
    calls
}

#[tokio::test]
async fn trivial_task_routes_local_despite_project_listing_and_preamble() {
    let task = Task::new("Fix the typo", "Fix the typo in the README heading");
    let calls = recorded_calls(&task, AgentSpecialization::security()).await;
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].1.phase, ThoughtPhase::Analyzing);

    let router = CostAwareRouter::new(RouterConfig::default());

    // The rendered analysis prompt alone reads as multi-file security work.
    let (prompt, hint) = &calls[0];
    let raw = router.select_model(&hint.task, prompt).await;
    assert_ne!(raw.tier, ModelTier::Local);
    router.cancel(raw).await;

    for (prompt, hint) in &calls {
        assert!(!hint.routing_text.contains("src/server.rs"));
        let choice = router
            .select_for_call(&hint.task, &hint.routing_text, prompt)
            .await;
        assert_eq!(choice.tier, ModelTier::Local, "{} call", hint.phase);
        assert!(choice.complexity.signals.is_empty(), "{:?}", choice.complexity.signals);
        router.cancel(choice).await;
    }
}

#[tokio::test]
async fn one_line_refactor_is_not_forced_premium_by_file_listing() {
    let task = Task::new("Refactor wording", "Refactor the error message wording");
    let calls = recorded_calls(&task, AgentSpecialization::general()).await;
    let router = CostAwareRouter::new(RouterConfig::default());

    for (prompt, hint) in &calls {
        let choice = router
            .select_for_call(&hint.task, &hint.routing_text, prompt)
            .await;
        assert_eq!(choice.tier, ModelTier::Cloud, "{} call", hint.phase);
        assert!(!choice.complexity.force_premium);
        router.cancel(choice).await;
    }
}

#[tokio::test]
async fn scaffolding_still_counts_towards_the_cost_estimate() {
    let task = Task::new("Fix the typo", "Fix the typo in the README heading");
    let calls = recorded_calls(&task, AgentSpecialization::security()).await;
    let router = CostAwareRouter::new(RouterConfig::default());

    let (prompt, hint) = &calls[0];
    let routed = router
        .select_for_call(&hint.task, &hint.routing_text, prompt)
        .await;
    let bare = router
        .select_for_call(&hint.task, &hint.routing_text, &hint.routing_text)
        .await;
    assert!(routed.estimated_tokens > bare.estimated_tokens);
    router.cancel(routed).await;
    router.cancel(bare).await;
}
