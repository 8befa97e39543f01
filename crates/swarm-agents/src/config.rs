//! Swarm configuration.
//!
//! Layering: built-in defaults → optional TOML file → `SWARM_*` environment
//! variables → [`SwarmConfig::validate`]. An invalid configuration is the
//! only thing that stops the swarm from starting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use coordination::cognition::{AgentSpecialization, PipelineConfig};
use coordination::router::{ModelTier, RouterConfig};
use coordination::verifier::QualityGateConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Analyze, generate options, justify.
const COGNITION_CALLS_PER_ATTEMPT: u32 = 3;

/// One worker slot in the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    pub specialization: String,
    /// Extra capabilities on top of the specialization's own
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl WorkerSpec {
    pub fn new(id: impl Into<String>, specialization: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            specialization: specialization.into(),
            capabilities: Vec::new(),
        }
    }
}

/// OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierEndpoints {
    pub local: Option<Endpoint>,
    pub cloud: Option<Endpoint>,
    pub premium: Option<Endpoint>,
}

impl Default for TierEndpoints {
    fn default() -> Self {
        Self {
            local: Some(Endpoint {
                url: "http://localhost:8080/v1".into(),
                model: "local-coder".into(),
                api_key: None,
            }),
            cloud: None,
            premium: None,
        }
    }
}

impl TierEndpoints {
    pub fn get(&self, tier: ModelTier) -> Option<&Endpoint> {
        match tier {
            ModelTier::Local => self.local.as_ref(),
            ModelTier::Cloud => self.cloud.as_ref(),
            ModelTier::Premium => self.premium.as_ref(),
        }
    }

    fn slot(&mut self, tier: ModelTier) -> &mut Option<Endpoint> {
        match tier {
            ModelTier::Local => &mut self.local,
            ModelTier::Cloud => &mut self.cloud,
            ModelTier::Premium => &mut self.premium,
        }
    }
}

/// Top-level swarm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub workers: Vec<WorkerSpec>,
    /// Custom specializations, looked up before the built-ins
    pub specializations: Vec<AgentSpecialization>,
    /// Idle wait between claim attempts
    pub poll_interval_ms: u64,
    /// Expected gap between worker heartbeats
    pub heartbeat_interval_ms: u64,
    /// A worker silent for `heartbeat_interval * multiplier` is unhealthy.
    /// Busy workers only heartbeat between inference calls, so the product
    /// should exceed `pipeline.call_timeout`.
    pub heartbeat_timeout_multiplier: u32,
    pub monitor_interval_ms: u64,
    /// Cognition runs per claim before the task is failed
    pub max_gate_attempts: u32,
    /// Health-driven releases per task before it is failed instead
    pub max_releases_per_task: u32,
    pub gate: QualityGateConfig,
    pub router: RouterConfig,
    pub availability_ttl_secs: u64,
    pub pipeline: PipelineConfig,
    pub endpoints: TierEndpoints,
    /// Use the built-in offline provider instead of HTTP endpoints
    pub offline: bool,
    /// Directory scanned for project context and checked by the gate
    pub workspace_root: Option<PathBuf>,
    /// Where the JSON status snapshot is written
    pub status_file: Option<PathBuf>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            workers: vec![
                WorkerSpec::new("agent-backend-1", "backend"),
                WorkerSpec::new("agent-qa-1", "qa"),
                WorkerSpec::new("agent-general-1", "general"),
            ],
            specializations: Vec::new(),
            poll_interval_ms: 500,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_multiplier: 15,
            monitor_interval_ms: 500,
            max_gate_attempts: 2,
            max_releases_per_task: 3,
            gate: QualityGateConfig::default(),
            router: RouterConfig::default(),
            availability_ttl_secs: 60,
            pipeline: PipelineConfig::default(),
            endpoints: TierEndpoints::default(),
            offline: false,
            workspace_root: None,
            status_file: None,
        }
    }
}

impl SwarmConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `SWARM_*` overrides from `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: String) -> ConfigResult<T> {
            value.trim().parse().map_err(|_| ConfigError::Env {
                key: key.to_string(),
                value,
            })
        }

        if let Some(v) = lookup("SWARM_WORKERS") {
            self.workers = parse_workers(&v).ok_or_else(|| ConfigError::Env {
                key: "SWARM_WORKERS".into(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("SWARM_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parsed("SWARM_POLL_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("SWARM_HEARTBEAT_INTERVAL_MS") {
            self.heartbeat_interval_ms = parsed("SWARM_HEARTBEAT_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("SWARM_HEARTBEAT_TIMEOUT_MULTIPLIER") {
            self.heartbeat_timeout_multiplier = parsed("SWARM_HEARTBEAT_TIMEOUT_MULTIPLIER", v)?;
        }
        if let Some(v) = lookup("SWARM_MONITOR_INTERVAL_MS") {
            self.monitor_interval_ms = parsed("SWARM_MONITOR_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("SWARM_MAX_GATE_ATTEMPTS") {
            self.max_gate_attempts = parsed("SWARM_MAX_GATE_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("SWARM_MAX_RELEASES") {
            self.max_releases_per_task = parsed("SWARM_MAX_RELEASES", v)?;
        }
        if let Some(v) = lookup("SWARM_MIN_QUALITY_SCORE") {
            self.gate.min_acceptable_score = parsed("SWARM_MIN_QUALITY_SCORE", v)?;
        }
        if let Some(v) = lookup("SWARM_MONTHLY_BUDGET") {
            self.router.monthly_budget = parsed("SWARM_MONTHLY_BUDGET", v)?;
        }
        if let Some(v) = lookup("SWARM_DAILY_PREMIUM_CAP") {
            self.router.daily_premium_cap = parsed("SWARM_DAILY_PREMIUM_CAP", v)?;
        }
        if let Some(v) = lookup("SWARM_OFFLINE") {
            self.offline = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("SWARM_WORKSPACE") {
            self.workspace_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SWARM_STATUS_FILE") {
            self.status_file = Some(PathBuf::from(v));
        }

        for tier in ModelTier::ALL {
            let prefix = format!("SWARM_{}", tier.to_string().to_ascii_uppercase());
            let url = lookup(&format!("{prefix}_URL"));
            let model = lookup(&format!("{prefix}_MODEL"));
            let api_key = lookup(&format!("{prefix}_API_KEY"));
            let slot = self.endpoints.slot(tier);
            if let Some(ep) = slot.as_mut() {
                if let Some(url) = url {
                    ep.url = url;
                }
                if let Some(model) = model {
                    ep.model = model;
                }
                if api_key.is_some() {
                    ep.api_key = api_key;
                }
            } else if let Some(url) = url {
                *slot = Some(Endpoint {
                    url,
                    model: model.unwrap_or_else(|| format!("{tier}-model")),
                    api_key,
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers.is_empty() {
            return Err(ConfigError::Invalid("at least one worker is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for w in &self.workers {
            if w.id.trim().is_empty() {
                return Err(ConfigError::Invalid("worker id is empty".into()));
            }
            if !seen.insert(w.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate worker id {}", w.id)));
            }
            self.specialization(&w.specialization)?;
        }
        for spec in &self.specializations {
            spec.validate()
                .map_err(|e| ConfigError::Invalid(format!("specialization {}: {e}", spec.name)))?;
        }
        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.heartbeat_timeout_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat_timeout_multiplier must be positive".into(),
            ));
        }
        if self
            .heartbeat_interval()
            .checked_mul(self.heartbeat_timeout_multiplier)
            .is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "heartbeat timeout {}ms x {} overflows",
                self.heartbeat_interval_ms, self.heartbeat_timeout_multiplier
            )));
        }
        if self.max_gate_attempts == 0 {
            return Err(ConfigError::Invalid("max_gate_attempts must be positive".into()));
        }
        let score = self.gate.min_acceptable_score;
        if !(0.0..=100.0).contains(&score) {
            return Err(ConfigError::Invalid(format!(
                "min_acceptable_score {score} outside [0, 100]"
            )));
        }
        if self.router.monthly_budget.is_nan() || self.router.monthly_budget < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "monthly_budget {} must be non-negative",
                self.router.monthly_budget
            )));
        }
        if self.pipeline.max_options == 0 {
            return Err(ConfigError::Invalid("pipeline.max_options must be positive".into()));
        }
        if !self.offline && self.endpoints.local.is_none() {
            return Err(ConfigError::Invalid(
                "a local endpoint is required unless offline".into(),
            ));
        }
        Ok(())
    }

    /// Resolve a specialization name: custom entries first, then built-ins.
    pub fn specialization(&self, name: &str) -> ConfigResult<AgentSpecialization> {
        if let Some(custom) = self
            .specializations
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
        {
            return Ok(custom.clone());
        }
        AgentSpecialization::builtin(name)
            .map_err(|e| ConfigError::Invalid(format!("worker specialization: {e}")))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Saturates instead of overflowing; `validate` rejects such values.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval()
            .checked_mul(self.heartbeat_timeout_multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// Longest a worker can spend on one claim: every gate attempt running
    /// every cognition call to its timeout. Shutdown waits this long before
    /// aborting a worker.
    pub fn shutdown_grace(&self) -> Duration {
        self.pipeline
            .call_timeout
            .checked_mul(COGNITION_CALLS_PER_ATTEMPT)
            .and_then(|d| d.checked_mul(self.max_gate_attempts.max(1)))
            .unwrap_or(Duration::MAX)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn availability_ttl(&self) -> Duration {
        Duration::from_secs(self.availability_ttl_secs)
    }
}

/// `id:specialization[,id:specialization...]`
fn parse_workers(s: &str) -> Option<Vec<WorkerSpec>> {
    let workers: Option<Vec<_>> = s
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, spec) = entry.split_once(':')?;
            (!id.trim().is_empty() && !spec.trim().is_empty())
                .then(|| WorkerSpec::new(id.trim(), spec.trim()))
        })
        .collect();
    workers.filter(|w| !w.is_empty())
}
