//! Inference capability consumed by the cognitive pipeline.
//!
//! The pipeline never talks to a model API directly. It hands a rendered
//! prompt plus a [`ModelHint`] to an [`InferenceProvider`]; the runtime
//! decides which tier serves the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::phase::ThoughtPhase;
use crate::queue::Task;

/// Failure of an inference call. Always recoverable from the pipeline's
/// point of view.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Result type for inference calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Routing context attached to each inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHint {
    /// Agent identity issuing the call
    pub agent: String,
    /// Phase the call is made from
    pub phase: ThoughtPhase,
    /// Task being worked on (priority and kind drive tier overrides)
    pub task: Task,
    /// Task-derived text the router classifies. Never includes prompt
    /// scaffolding such as preambles or project file listings.
    #[serde(default)]
    pub routing_text: String,
}

impl ModelHint {
    /// Routes on the task title and description.
    pub fn new(agent: impl Into<String>, phase: ThoughtPhase, task: &Task) -> Self {
        Self {
            agent: agent.into(),
            phase,
            task: task.clone(),
            routing_text: task_text(task),
        }
    }

    pub fn with_routing_text(mut self, text: impl Into<String>) -> Self {
        self.routing_text = text.into();
        self
    }
}

fn task_text(task: &Task) -> String {
    format!("{}\n{}", task.title.trim(), task.description.trim())
        .trim()
        .to_string()
}

/// `complete(prompt, hint) -> text`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<String>;
}

#[async_trait]
impl<T: InferenceProvider + ?Sized> InferenceProvider for Arc<T> {
    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<String> {
        (**self).complete(prompt, hint).await
    }
}
