//! Runtime wiring for the coding swarm: configuration, inference backends,
//! the agent worker loop and the orchestrator that supervises it.

pub mod config;
pub mod inference;
pub mod orchestrator;
pub mod telemetry;
pub mod worker;

pub use config::{ConfigError, ConfigResult, Endpoint, SwarmConfig, TierEndpoints, WorkerSpec};
pub use inference::{
    build_provider, Completion, HttpAvailabilityProbe, HttpInferenceBackend, OfflineBackend,
    RoutedInference, TierBackend,
};
pub use orchestrator::{
    OrchestratorError, OrchestratorResult, StatusSink, SwarmBuilder, SwarmEvent,
    SwarmOrchestrator, SwarmStats, SwarmStatus, WorkerHealth, WorkerSnapshot,
};
pub use telemetry::{init_tracing, JsonFileStatusSink, LogStatusSink};
pub use worker::{AgentWorker, WorkerContext, WorkerMessage, WorkerReport};
