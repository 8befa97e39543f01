//! Model Router Module
//!
//! Chooses the cheapest inference tier that can plausibly handle a prompt,
//! under a monthly budget and a daily premium-call cap.
//!
//! # Tiers
//!
//! ```text
//! Tier     | Cost / 1K tokens | Suggested for
//! ---------|------------------|-------------------------------
//! local    | 0                | simple prompts, reviews, checks
//! cloud    | 0.002            | moderate prompts, urgent tasks
//! premium  | 0.03             | architecture, consolidation
//! ```
//!
//! Every routed call is reserved against the [`UsageLedger`] when selected
//! and settled with its actual cost by `record_usage`.

pub mod availability;
pub mod classifier;
pub mod ledger;
pub mod selector;
pub mod tier;

pub use availability::{AvailabilityProbe, ModelAvailabilityCache};
pub use classifier::{ComplexityEstimate, ComplexityLevel, PromptClassifier};
pub use ledger::{TierUsage, UsageLedger, UsageSnapshot};
pub use selector::{CostAwareRouter, ModelChoice, RouterConfig};
pub use tier::{ModelTier, TierRates};
