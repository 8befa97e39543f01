//! Inference backends and the routed provider handed to every pipeline.
//!
//! ```text
//! CognitivePipeline ──complete(prompt, hint)──▶ RoutedInference
//!                                                 │ select_model
//!                                                 ▼
//!                                   CostAwareRouter ──▶ TierBackend (http | offline)
//!                                                 │ record_usage
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coordination::cognition::{InferenceProvider, ModelHint, ProviderError, ProviderResult, ThoughtPhase};
use coordination::router::{AvailabilityProbe, CostAwareRouter, ModelChoice, ModelTier};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{Endpoint, SwarmConfig};

/// Text plus token accounting returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Tokens reported by the backend, when it reports them
    pub total_tokens: Option<u64>,
}

/// One concrete model behind a tier.
#[async_trait]
pub trait TierBackend: Send + Sync {
    fn name(&self) -> String;
    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<Completion>;
}

const SYSTEM_PROMPT: &str = "You are a member of an autonomous software engineering team. \
Answer with the JSON requested by the user message and nothing else.";

/// OpenAI-compatible `/chat/completions` backend.
pub struct HttpInferenceBackend {
    tier: ModelTier,
    endpoint: Endpoint,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpInferenceBackend {
    pub fn new(tier: ModelTier, endpoint: Endpoint, timeout: Duration) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            tier,
            endpoint,
            timeout,
            http,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl TierBackend for HttpInferenceBackend {
    fn name(&self) -> String {
        format!("{}:{}", self.tier, self.endpoint.model)
    }

    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<Completion> {
        let body = json!({
            "model": self.endpoint.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": temperature(hint.phase),
            "max_tokens": 2048
        });

        let mut request = self.http.post(self.completions_url()).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else if e.is_connect() {
                ProviderError::Unavailable(format!("{}: {e}", self.endpoint.url))
            } else {
                ProviderError::Provider(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Provider(format!(
                "{} returned {status}: {}",
                self.endpoint.url,
                body.chars().take(200).collect::<String>()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("missing message content".into()))?
            .to_string();

        Ok(Completion {
            text,
            total_tokens: value["usage"]["total_tokens"].as_u64(),
        })
    }
}

fn temperature(phase: ThoughtPhase) -> f32 {
    match phase {
        ThoughtPhase::GeneratingOptions => 0.7,
        ThoughtPhase::Justifying => 0.4,
        _ => 0.2,
    }
}

/// Deterministic backend for offline runs and tests. Answers each phase
/// with well-formed JSON derived from the task.
#[derive(Debug, Clone, Default)]
pub struct OfflineBackend;

impl OfflineBackend {
    fn slug(title: &str) -> String {
        let mut slug = String::new();
        for c in title.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('_') && !slug.is_empty() {
                slug.push('_');
            }
            if slug.len() >= 32 {
                break;
            }
        }
        let slug = slug.trim_end_matches('_').to_string();
        if slug.is_empty() {
            "task".to_string()
        } else {
            slug
        }
    }

    fn respond(hint: &ModelHint) -> String {
        let task = &hint.task;
        let slug = Self::slug(&task.title);
        let problem = if task.description.trim().is_empty() {
            &task.title
        } else {
            &task.description
        };
        match hint.phase {
            ThoughtPhase::Analyzing => json!({
                "problem": problem,
                "context": format!("{} task handled by {}", task.kind, hint.agent),
                "constraints": ["keep changes small and covered by tests"]
            })
            .to_string(),
            ThoughtPhase::GeneratingOptions => json!({
                "options": [
                    {
                        "title": "Focused module change",
                        "description": "Add a dedicated module with unit tests",
                        "approach": "Introduce a small module and cover it with tests",
                        "pros": ["small diff", "easy to review"],
                        "cons": ["adds a module"],
                        "estimated_minutes": 30,
                        "complexity": "low",
                        "confidence": 0.82,
                        "risks": [],
                        "changes": [
                            {"path": format!("src/{slug}.rs"), "description": "New module with the requested behaviour", "lines": 60, "kind": "create"},
                            {"path": format!("tests/{slug}_test.rs"), "description": "Integration tests for the new module", "lines": 40, "kind": "create"}
                        ]
                    },
                    {
                        "title": "Inline change",
                        "description": "Extend the existing entry point directly",
                        "approach": "Edit the caller in place",
                        "pros": ["no new files"],
                        "cons": ["larger function", "harder to test"],
                        "estimated_minutes": 20,
                        "complexity": "medium",
                        "confidence": 0.6,
                        "risks": ["regression in existing callers"],
                        "changes": [
                            {"path": format!("src/{slug}_inline.rs"), "description": "Extend the entry point", "lines": 80, "kind": "create"}
                        ]
                    }
                ]
            })
            .to_string(),
            _ => format!(
                "The focused module keeps the change reviewable and testable for \"{}\".",
                task.title
            ),
        }
    }
}

#[async_trait]
impl TierBackend for OfflineBackend {
    fn name(&self) -> String {
        "offline".to_string()
    }

    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<Completion> {
        let text = Self::respond(hint);
        let tokens = (prompt.len() + text.len()) as u64 / 4;
        Ok(Completion {
            text,
            total_tokens: Some(tokens),
        })
    }
}

/// Routes every call through the [`CostAwareRouter`] and settles the
/// reservation with the tokens actually used.
pub struct RoutedInference {
    router: Arc<CostAwareRouter>,
    backends: HashMap<ModelTier, Arc<dyn TierBackend>>,
}

impl RoutedInference {
    pub fn new(router: Arc<CostAwareRouter>) -> Self {
        Self {
            router,
            backends: HashMap::new(),
        }
    }

    pub fn with_backend(mut self, tier: ModelTier, backend: Arc<dyn TierBackend>) -> Self {
        self.backends.insert(tier, backend);
        self
    }

    pub fn router(&self) -> &Arc<CostAwareRouter> {
        &self.router
    }

    /// Backend for `tier`, or the nearest cheaper tier that has one.
    fn backend_for(&self, tier: ModelTier) -> Option<(ModelTier, &Arc<dyn TierBackend>)> {
        let mut current = tier;
        loop {
            if let Some(b) = self.backends.get(&current) {
                return Some((current, b));
            }
            if current == ModelTier::Local {
                return None;
            }
            current = current.cheaper();
        }
    }
}

/// Cancels the reservation if the call future is dropped before settling,
/// e.g. when the orchestrator aborts a hung worker.
struct PendingChoice {
    router: Arc<CostAwareRouter>,
    choice: Option<ModelChoice>,
}

impl PendingChoice {
    fn take(&mut self) -> Option<ModelChoice> {
        self.choice.take()
    }
}

impl Drop for PendingChoice {
    fn drop(&mut self) {
        let Some(choice) = self.choice.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let router = self.router.clone();
            debug!(tier = %choice.tier, "Cancelling reservation of abandoned call");
            handle.spawn(async move { router.cancel(choice).await });
        }
    }
}

#[async_trait]
impl InferenceProvider for RoutedInference {
    async fn complete(&self, prompt: &str, hint: &ModelHint) -> ProviderResult<String> {
        let routing = if hint.routing_text.trim().is_empty() {
            prompt
        } else {
            hint.routing_text.as_str()
        };
        let choice = self.router.select_for_call(&hint.task, routing, prompt).await;
        let chosen = choice.tier;
        let estimated_tokens = choice.estimated_tokens;
        let mut pending = PendingChoice {
            router: self.router.clone(),
            choice: Some(choice),
        };

        let Some((served_by, backend)) = self.backend_for(chosen) else {
            if let Some(choice) = pending.take() {
                self.router.cancel(choice).await;
            }
            return Err(ProviderError::Unavailable(format!("no backend for tier {chosen}")));
        };
        if served_by != chosen {
            debug!(chosen = %chosen, served_by = %served_by, "Tier has no backend, using cheaper one");
        }

        let outcome = backend.complete(prompt, hint).await;
        let Some(mut choice) = pending.take() else {
            return outcome.map(|c| c.text);
        };
        match outcome {
            Ok(completion) => {
                let tokens = completion.total_tokens.unwrap_or(estimated_tokens);
                let cost = self.router.config().rates.cost(served_by, tokens);
                debug!(
                    agent = %hint.agent,
                    phase = %hint.phase,
                    backend = %backend.name(),
                    tokens,
                    cost,
                    "Inference call served"
                );
                choice.tier = served_by;
                choice.estimated_tokens = tokens;
                self.router.record_usage(choice, cost).await;
                Ok(completion.text)
            }
            Err(e) => {
                warn!(backend = %backend.name(), error = %e, "Inference call failed");
                if matches!(e, ProviderError::Unavailable(_)) {
                    if let Some(cache) = self.router.availability() {
                        cache.set(served_by, false).await;
                    }
                }
                self.router.cancel(choice).await;
                Err(e)
            }
        }
    }
}

/// Probes `GET {url}/models` on each configured endpoint. Tiers without an
/// endpoint are reported unavailable, except local in offline mode.
pub struct HttpAvailabilityProbe {
    endpoints: HashMap<ModelTier, Endpoint>,
    http: reqwest::Client,
}

impl HttpAvailabilityProbe {
    pub fn new(config: &SwarmConfig) -> Self {
        let endpoints = ModelTier::ALL
            .into_iter()
            .filter_map(|t| config.endpoints.get(t).cloned().map(|e| (t, e)))
            .collect();
        Self {
            endpoints,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AvailabilityProbe for HttpAvailabilityProbe {
    async fn probe(&self, tier: ModelTier) -> bool {
        let Some(endpoint) = self.endpoints.get(&tier) else {
            return false;
        };
        let url = format!("{}/models", endpoint.url.trim_end_matches('/'));
        let mut request = self.http.get(&url).timeout(Duration::from_secs(5));
        if let Some(key) = &endpoint.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(tier = %tier, url = %url, error = %e, "Availability probe failed");
                false
            }
        }
    }
}

/// Build the provider shared by all workers.
pub fn build_provider(config: &SwarmConfig, router: Arc<CostAwareRouter>) -> ProviderResult<RoutedInference> {
    let mut routed = RoutedInference::new(router);
    if config.offline {
        return Ok(routed.with_backend(ModelTier::Local, Arc::new(OfflineBackend)));
    }
    for tier in ModelTier::ALL {
        if let Some(endpoint) = config.endpoints.get(tier) {
            let backend = HttpInferenceBackend::new(tier, endpoint.clone(), config.pipeline.call_timeout)?;
            routed = routed.with_backend(tier, Arc::new(backend));
        }
    }
    Ok(routed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::cognition::parse::{parse_analysis, parse_options};
    use coordination::queue::{Task, TaskKind, TaskPriority};
    use coordination::router::RouterConfig;

    struct FailingBackend;

    #[async_trait]
    impl TierBackend for FailingBackend {
        fn name(&self) -> String {
            "failing".into()
        }
        async fn complete(&self, _: &str, _: &ModelHint) -> ProviderResult<Completion> {
            Err(ProviderError::Provider("boom".into()))
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl TierBackend for HangingBackend {
        fn name(&self) -> String {
            "hanging".into()
        }
        async fn complete(&self, _: &str, _: &ModelHint) -> ProviderResult<Completion> {
            std::future::pending().await
        }
    }

    fn hint(phase: ThoughtPhase, task: &Task) -> ModelHint {
        ModelHint::new("agent-1", phase, task)
    }

    #[test]
    fn test_slug() {
        assert_eq!(OfflineBackend::slug("Add retry/backoff to HTTP client!"), "add_retry_backoff_to_http_client");
        assert_eq!(OfflineBackend::slug("!!!"), "task");
    }

    #[tokio::test]
    async fn test_offline_responses_parse() {
        let task = Task::new("Add rate limiter", "Limit requests per client");
        let backend = OfflineBackend;

        let analysis = backend.complete("p", &hint(ThoughtPhase::Analyzing, &task)).await.unwrap();
        let analysis = parse_analysis(&analysis.text).unwrap();
        assert_eq!(analysis.problem, "Limit requests per client");

        let options = backend
            .complete("p", &hint(ThoughtPhase::GeneratingOptions, &task))
            .await
            .unwrap();
        let options = parse_options(&options.text, 3);
        assert_eq!(options.len(), 2);
        assert!(options[0].is_viable());
        assert_eq!(options[0].changes.len(), 2);
        assert!(options[0].changes.iter().any(|c| c.is_test()));
    }

    #[tokio::test]
    async fn test_routed_inference_records_usage() {
        let router = Arc::new(CostAwareRouter::new(RouterConfig::default()));
        let routed = RoutedInference::new(router.clone())
            .with_backend(ModelTier::Local, Arc::new(OfflineBackend));

        // Urgent task escalates to cloud; no cloud backend, so local serves it.
        let task = Task::new("t", "d").with_priority(TaskPriority::High);
        let text = routed
            .complete("Fix the typo", &hint(ThoughtPhase::Analyzing, &task))
            .await
            .unwrap();
        assert!(text.contains("problem"));

        let usage = router.usage().await;
        assert_eq!(usage.calls(ModelTier::Local), 1);
        assert_eq!(usage.calls(ModelTier::Cloud), 0);
        assert_eq!(usage.monthly_spend, 0.0);
        assert_eq!(usage.reserved_spend, 0.0);
    }

    #[tokio::test]
    async fn test_failed_call_cancels_reservation() {
        let router = Arc::new(CostAwareRouter::new(RouterConfig::default()));
        let routed = RoutedInference::new(router.clone())
            .with_backend(ModelTier::Local, Arc::new(FailingBackend));
        let task = Task::new("t", "d").with_kind(TaskKind::Check);

        let err = routed
            .complete("Review", &hint(ThoughtPhase::Analyzing, &task))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Provider("boom".into()));
        let usage = router.usage().await;
        assert_eq!(usage.total_calls(), 0);
        assert_eq!(usage.reserved_spend, 0.0);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_reservation() {
        let router = Arc::new(CostAwareRouter::new(RouterConfig::default()));
        let routed = RoutedInference::new(router.clone())
            .with_backend(ModelTier::Premium, Arc::new(HangingBackend));
        let task = Task::new("Redesign", "Redesign the architecture");

        let call_hint = hint(ThoughtPhase::Analyzing, &task);
        let call = routed.complete("Redesign the architecture", &call_hint);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), call).await;
        assert!(timed_out.is_err());

        for _ in 0..50 {
            if router.usage().await.reserved_premium_calls == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let usage = router.usage().await;
        assert_eq!(usage.reserved_premium_calls, 0);
        assert_eq!(usage.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_backend_is_unavailable() {
        let router = Arc::new(CostAwareRouter::new(RouterConfig::default()));
        let routed = RoutedInference::new(router);
        let task = Task::new("t", "d");
        let err = routed
            .complete("x", &hint(ThoughtPhase::Analyzing, &task))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_build_provider_offline() {
        let config = SwarmConfig {
            offline: true,
            ..Default::default()
        };
        let router = Arc::new(CostAwareRouter::new(config.router.clone()));
        let routed = build_provider(&config, router).unwrap();
        assert!(routed.backends.contains_key(&ModelTier::Local));
        assert_eq!(routed.backends.len(), 1);
    }
}
