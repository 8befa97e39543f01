//! Cost-aware model selection.
//!
//! # Override order
//!
//! ```text
//! classifier suggestion
//!   → low-stakes kind          : force local
//!   → urgent priority          : local suggestion escalates to cloud
//!   → forced-premium signal    : premium
//!   → daily premium cap        : premium falls to cloud
//!   → remaining budget         : step down until the estimate fits
//!   → monthly budget exhausted : local
//!   → availability             : next cheaper available tier
//! ```
//!
//! Budget limits are applied after the forced-premium rule, so a hard limit
//! always wins. The budget check and the reservation share one lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::availability::ModelAvailabilityCache;
use super::classifier::{ComplexityEstimate, PromptClassifier};
use super::ledger::{ReservationId, UsageLedger, UsageSnapshot};
use super::tier::{ModelTier, TierRates};
use crate::queue::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Monthly spend ceiling across metered tiers
    pub monthly_budget: f64,
    /// Maximum premium calls per UTC day
    pub daily_premium_cap: u32,
    pub rates: TierRates,
    /// Completion tokens assumed when estimating cost
    pub expected_completion_tokens: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            monthly_budget: 50.0,
            daily_premium_cap: 20,
            rates: TierRates::default(),
            expected_completion_tokens: 1_024,
        }
    }
}

/// A routing decision. Holds a reservation against the ledger until passed
/// to [`CostAwareRouter::record_usage`] or [`CostAwareRouter::cancel`].
#[derive(Debug, Serialize)]
pub struct ModelChoice {
    pub tier: ModelTier,
    pub estimated_cost: f64,
    pub estimated_tokens: u64,
    /// Rules applied, in order
    pub reasoning: Vec<String>,
    pub complexity: ComplexityEstimate,
    #[serde(skip)]
    reservation: ReservationId,
}

impl ModelChoice {
    pub fn reasoning_summary(&self) -> String {
        self.reasoning.join("; ")
    }
}

pub struct CostAwareRouter {
    config: RouterConfig,
    classifier: PromptClassifier,
    ledger: Mutex<UsageLedger>,
    availability: Option<Arc<ModelAvailabilityCache>>,
}

impl CostAwareRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    pub fn new_at(config: RouterConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            classifier: PromptClassifier::new(),
            ledger: Mutex::new(UsageLedger::new(now)),
            availability: None,
        }
    }

    pub fn with_availability(mut self, cache: Arc<ModelAvailabilityCache>) -> Self {
        self.availability = Some(cache);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn availability(&self) -> Option<&Arc<ModelAvailabilityCache>> {
        self.availability.as_ref()
    }

    pub async fn select_model(&self, task: &Task, prompt: &str) -> ModelChoice {
        self.select_model_at(task, prompt, Utc::now()).await
    }

    pub async fn select_model_at(
        &self,
        task: &Task,
        prompt: &str,
        now: DateTime<Utc>,
    ) -> ModelChoice {
        self.select_for_call_at(task, prompt, prompt, now).await
    }

    /// Route a rendered prompt by its task-derived `routing_text` only.
    /// Scaffolding in `prompt` (preambles, project listings) counts towards
    /// the cost estimate but never towards complexity.
    pub async fn select_for_call(
        &self,
        task: &Task,
        routing_text: &str,
        prompt: &str,
    ) -> ModelChoice {
        self.select_for_call_at(task, routing_text, prompt, Utc::now()).await
    }

    pub async fn select_for_call_at(
        &self,
        task: &Task,
        routing_text: &str,
        prompt: &str,
        now: DateTime<Utc>,
    ) -> ModelChoice {
        let complexity = self.classifier.classify(routing_text);
        let prompt_tokens = (prompt.chars().count() as u64).div_ceil(4);
        let tokens =
            prompt_tokens.max(complexity.prompt_tokens) + self.config.expected_completion_tokens;
        let mut reasoning = Vec::new();

        let mut tier = complexity.level.suggested_tier();
        reasoning.push(format!(
            "{} prompt (score {}) suggests {tier}",
            complexity.level, complexity.score
        ));

        if task.kind.is_low_stakes() {
            if tier != ModelTier::Local {
                reasoning.push(format!("{} task is low-stakes: local", task.kind));
            }
            tier = ModelTier::Local;
        } else if task.priority.is_urgent() && tier == ModelTier::Local {
            tier = ModelTier::Cloud;
            reasoning.push(format!("{} priority escalates to cloud", task.priority));
        }

        if complexity.force_premium && tier != ModelTier::Premium {
            tier = ModelTier::Premium;
            reasoning.push(format!(
                "signals [{}] force premium",
                complexity.signals.join(", ")
            ));
        }

        // Read availability before taking the ledger lock.
        let mut available = [true; 3];
        if let Some(cache) = &self.availability {
            for (slot, t) in available.iter_mut().zip(ModelTier::ALL) {
                *slot = cache.get(t).await.unwrap_or(true);
            }
        }

        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(now);

        if tier == ModelTier::Premium
            && ledger.committed_premium_calls() >= self.config.daily_premium_cap
        {
            tier = ModelTier::Cloud;
            reasoning.push(format!(
                "daily premium cap {} reached: cloud",
                self.config.daily_premium_cap
            ));
            info!(cap = self.config.daily_premium_cap, "Premium cap forced cloud tier");
        }

        let budget = self.config.monthly_budget.max(0.0);
        let remaining = budget - ledger.committed_spend();
        while tier != ModelTier::Local && self.config.rates.cost(tier, tokens) > remaining {
            let cheaper = tier.cheaper();
            reasoning.push(format!(
                "estimate {:.4} exceeds remaining budget {:.4}: {cheaper}",
                self.config.rates.cost(tier, tokens),
                remaining.max(0.0)
            ));
            tier = cheaper;
        }

        if ledger.committed_spend() >= budget {
            if tier != ModelTier::Local {
                tier = ModelTier::Local;
                reasoning.push("monthly budget exhausted: local".to_string());
            }
            info!(
                spend = ledger.committed_spend(),
                budget, "Monthly budget exhausted, routing locally"
            );
        }

        while tier != ModelTier::Local && !available[tier_index(tier)] {
            let cheaper = tier.cheaper();
            reasoning.push(format!("{tier} unavailable: {cheaper}"));
            tier = cheaper;
        }

        let estimated_cost = self.config.rates.cost(tier, tokens);
        let reservation = ledger.reserve(tier, estimated_cost);
        drop(ledger);

        debug!(
            task_id = %task.id,
            tier = %tier,
            estimated_cost,
            reasoning = %reasoning.join("; "),
            "Model selected"
        );

        ModelChoice {
            tier,
            estimated_cost,
            estimated_tokens: tokens,
            reasoning,
            complexity,
            reservation,
        }
    }

    /// Settle a choice against its actual cost. The call is booked against
    /// `choice.tier` and `choice.estimated_tokens`, which callers overwrite
    /// with the serving tier and the token count the backend reported.
    pub async fn record_usage(&self, choice: ModelChoice, actual_cost: f64) {
        self.record_usage_at(choice, actual_cost, Utc::now()).await;
    }

    pub async fn record_usage_at(&self, choice: ModelChoice, actual_cost: f64, now: DateTime<Utc>) {
        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(now);
        ledger.settle(choice.reservation, choice.tier, actual_cost, choice.estimated_tokens);
    }

    /// Drop a choice whose call never happened.
    pub async fn cancel(&self, choice: ModelChoice) {
        self.ledger.lock().await.cancel(choice.reservation);
    }

    pub async fn usage(&self) -> UsageSnapshot {
        self.usage_at(Utc::now()).await
    }

    pub async fn usage_at(&self, now: DateTime<Utc>) -> UsageSnapshot {
        let mut ledger = self.ledger.lock().await;
        ledger.roll_over(now);
        ledger.snapshot()
    }

    /// Advisory text derived from the ledger. Never changes routing.
    pub async fn optimization_recommendations(&self) -> Vec<String> {
        let usage = self.usage().await;
        recommendations(&usage, &self.config)
    }
}

impl Default for CostAwareRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

fn tier_index(tier: ModelTier) -> usize {
    match tier {
        ModelTier::Local => 0,
        ModelTier::Cloud => 1,
        ModelTier::Premium => 2,
    }
}

pub(crate) fn recommendations(usage: &UsageSnapshot, config: &RouterConfig) -> Vec<String> {
    let total = usage.total_calls();
    if total == 0 {
        return vec!["No routed calls recorded yet".to_string()];
    }

    let mut recs = Vec::new();
    let premium_share = usage.share(ModelTier::Premium);
    if premium_share > 0.2 {
        recs.push(format!(
            "Premium tier used in {:.0}% of calls, consider raising local-tier preference",
            premium_share * 100.0
        ));
    }

    if config.monthly_budget > 0.0 {
        let spent = usage.monthly_spend / config.monthly_budget;
        if spent >= 0.8 {
            recs.push(format!(
                "Monthly spend at {:.0}% of budget, expect local-only routing soon",
                spent * 100.0
            ));
        } else if usage.share(ModelTier::Local) > 0.8 && spent < 0.1 {
            recs.push(
                "Most calls run locally with ample budget left, complex tasks could use the cloud tier"
                    .to_string(),
            );
        }
    }

    if config.daily_premium_cap > 0 && usage.daily_premium_calls >= config.daily_premium_cap {
        recs.push(format!(
            "Daily premium cap of {} reached, later complex prompts fall back to cloud",
            config.daily_premium_cap
        ));
    }

    if recs.is_empty() {
        recs.push("Routing mix is within expected bounds".to_string());
    }
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{TaskKind, TaskPriority};
    use chrono::TimeZone;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 14, 12, 0, 0).unwrap()
    }

    fn task() -> Task {
        Task::new("t", "d")
    }

    const SIMPLE: &str = "Fix the typo in the README heading";
    const MODERATE: &str = "Refactor the queue store for readability";
    const CONSOLIDATE: &str = "Consolidate the two config loaders";

    #[tokio::test]
    async fn test_suggestion_is_used_without_overrides() {
        let router = CostAwareRouter::new_at(RouterConfig::default(), now());
        let c = router.select_model_at(&task(), SIMPLE, now()).await;
        assert_eq!(c.tier, ModelTier::Local);
        assert_eq!(c.estimated_cost, 0.0);
        let c = router.select_model_at(&task(), MODERATE, now()).await;
        assert_eq!(c.tier, ModelTier::Cloud);
        assert!(c.estimated_cost > 0.0);
    }

    #[tokio::test]
    async fn test_low_stakes_forces_local() {
        let router = CostAwareRouter::new_at(RouterConfig::default(), now());
        let t = task()
            .with_kind(TaskKind::Review)
            .with_priority(TaskPriority::Immediate);
        let c = router.select_model_at(&t, MODERATE, now()).await;
        assert_eq!(c.tier, ModelTier::Local);
    }

    #[tokio::test]
    async fn test_urgent_priority_escalates_local() {
        let router = CostAwareRouter::new_at(RouterConfig::default(), now());
        let t = task().with_priority(TaskPriority::High);
        let c = router.select_model_at(&t, SIMPLE, now()).await;
        assert_eq!(c.tier, ModelTier::Cloud);
    }

    #[tokio::test]
    async fn test_forced_premium_even_for_low_stakes() {
        let router = CostAwareRouter::new_at(RouterConfig::default(), now());
        let t = task().with_kind(TaskKind::Check);
        let c = router.select_model_at(&t, CONSOLIDATE, now()).await;
        assert_eq!(c.tier, ModelTier::Premium);
    }

    #[tokio::test]
    async fn test_premium_cap_counts_reservations() {
        let config = RouterConfig {
            daily_premium_cap: 2,
            ..Default::default()
        };
        let router = CostAwareRouter::new_at(config, now());
        let a = router.select_model_at(&task(), CONSOLIDATE, now()).await;
        let b = router.select_model_at(&task(), CONSOLIDATE, now()).await;
        let c = router.select_model_at(&task(), CONSOLIDATE, now()).await;
        assert_eq!(a.tier, ModelTier::Premium);
        assert_eq!(b.tier, ModelTier::Premium);
        assert_eq!(c.tier, ModelTier::Cloud);

        router.cancel(c).await;
        router.record_usage_at(a, 0.01, now()).await;
        router.record_usage_at(b, 0.01, now()).await;

        // Next day the cap resets.
        let tomorrow = now() + chrono::Duration::days(1);
        let d = router.select_model_at(&task(), CONSOLIDATE, tomorrow).await;
        assert_eq!(d.tier, ModelTier::Premium);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_forces_local() {
        let config = RouterConfig {
            monthly_budget: 1.0,
            ..Default::default()
        };
        let router = CostAwareRouter::new_at(config, now());
        let c = router.select_model_at(&task(), MODERATE, now()).await;
        router.record_usage_at(c, 1.0, now()).await;

        for prompt in [SIMPLE, MODERATE, CONSOLIDATE] {
            let c = router.select_model_at(&task(), prompt, now()).await;
            assert_eq!(c.tier, ModelTier::Local, "prompt: {prompt}");
            router.record_usage_at(c, 0.0, now()).await;
        }

        let next_month = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let c = router.select_model_at(&task(), MODERATE, next_month).await;
        assert_eq!(c.tier, ModelTier::Cloud);
    }

    #[tokio::test]
    async fn test_steps_down_when_estimate_exceeds_remaining() {
        let config = RouterConfig {
            // premium estimate is ~0.031, cloud ~0.002
            monthly_budget: 0.01,
            ..Default::default()
        };
        let router = CostAwareRouter::new_at(config, now());
        let c = router.select_model_at(&task(), CONSOLIDATE, now()).await;
        assert_eq!(c.tier, ModelTier::Cloud);
        assert!(c.reasoning.iter().any(|r| r.contains("exceeds remaining budget")));
    }

    #[tokio::test]
    async fn test_unavailable_tier_falls_back() {
        let cache = Arc::new(ModelAvailabilityCache::new(Duration::from_secs(60)));
        cache.set(ModelTier::Premium, false).await;
        cache.set(ModelTier::Cloud, false).await;
        let router =
            CostAwareRouter::new_at(RouterConfig::default(), now()).with_availability(cache);
        let c = router.select_model_at(&task(), CONSOLIDATE, now()).await;
        assert_eq!(c.tier, ModelTier::Local);
        assert!(c.reasoning_summary().contains("premium unavailable"));
    }

    #[tokio::test]
    async fn test_usage_and_recommendations() {
        let router = CostAwareRouter::new_at(RouterConfig::default(), now());
        assert_eq!(
            recommendations(&router.usage_at(now()).await, router.config()),
            vec!["No routed calls recorded yet".to_string()]
        );

        for _ in 0..3 {
            let c = router.select_model_at(&task(), CONSOLIDATE, now()).await;
            router.record_usage_at(c, 0.03, now()).await;
        }
        let usage = router.usage_at(now()).await;
        assert_eq!(usage.calls(ModelTier::Premium), 3);
        assert_eq!(usage.daily_premium_calls, 3);
        let recs = recommendations(&usage, router.config());
        assert!(recs[0].starts_with("Premium tier used in 100% of calls"));
    }
}
