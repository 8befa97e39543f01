//! Inference tiers and their metered rates.

use serde::{Deserialize, Serialize};

/// Cost/capability class of an inference backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Self-hosted model, free to call
    Local,
    /// Metered, cheap
    Cloud,
    /// Metered, expensive, highest capability
    Premium,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [Self::Local, Self::Cloud, Self::Premium];

    /// Step down one tier. `Local` stays `Local`.
    pub fn cheaper(&self) -> Self {
        match self {
            Self::Premium => Self::Cloud,
            Self::Cloud | Self::Local => Self::Local,
        }
    }

    /// Step up one tier. `Premium` stays `Premium`.
    pub fn escalate(&self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud | Self::Premium => Self::Premium,
        }
    }

    pub fn is_metered(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cloud => write!(f, "cloud"),
            Self::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "free" => Ok(Self::Local),
            "cloud" | "cheap" => Ok(Self::Cloud),
            "premium" | "expensive" => Ok(Self::Premium),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

/// Cost per 1K tokens for each tier (currency units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRates {
    pub local: f64,
    pub cloud: f64,
    pub premium: f64,
}

impl Default for TierRates {
    fn default() -> Self {
        Self {
            local: 0.0,
            cloud: 0.002,
            premium: 0.03,
        }
    }
}

impl TierRates {
    pub fn per_1k(&self, tier: ModelTier) -> f64 {
        let rate = match tier {
            ModelTier::Local => self.local,
            ModelTier::Cloud => self.cloud,
            ModelTier::Premium => self.premium,
        };
        rate.max(0.0)
    }

    pub fn cost(&self, tier: ModelTier, tokens: u64) -> f64 {
        self.per_1k(tier) * tokens as f64 / 1000.0
    }
}
