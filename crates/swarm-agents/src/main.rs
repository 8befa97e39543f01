//! `swarm-agents` command line.
//!
//! ```bash
//! # Run the swarm over a task file against the configured endpoints
//! swarm-agents run --config swarm.toml --tasks tasks.toml
//!
//! # Same, with canned offline responses
//! swarm-agents run --offline --task "Add request logging"
//!
//! # Inspect a routing decision without calling a model
//! swarm-agents route --prompt "Redesign the storage layer" --priority high
//!
//! # Score a serialized solution
//! swarm-agents gate --solution solution.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use coordination::cognition::AgentSolution;
use coordination::queue::{Task, TaskKind, TaskPriority};
use coordination::router::{CostAwareRouter, ModelAvailabilityCache};
use coordination::verifier::{FsWorkspace, QualityGate};
use serde::Deserialize;
use tracing::{info, warn};

use swarm_agents::{
    build_provider, init_tracing, HttpAvailabilityProbe, JsonFileStatusSink, LogStatusSink,
    SwarmConfig, SwarmOrchestrator,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (SWARM_* variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the swarm until the queue drains, then print final stats as JSON
    Run {
        /// Use canned local responses instead of HTTP endpoints
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// TOML file with a `[[tasks]]` array
        #[arg(long, conflicts_with = "task")]
        tasks: Option<PathBuf>,

        /// Single task title (repeatable)
        #[arg(long)]
        task: Vec<String>,

        /// Give up waiting for the queue to drain after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Seconds workers get to finish their iteration on shutdown.
        /// Defaults to the longest a claim can take.
        #[arg(long)]
        grace_secs: Option<u64>,
    },

    /// Print the router's decision for a prompt
    Route {
        #[arg(long)]
        prompt: String,

        #[arg(long, default_value = "medium")]
        priority: String,

        #[arg(long, default_value = "feature")]
        kind: String,
    },

    /// Validate a serialized AgentSolution and print the quality report
    Gate {
        #[arg(long)]
        solution: PathBuf,
    },
}

/// One entry of a `--tasks` file.
#[derive(Debug, Deserialize)]
struct TaskSpec {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: TaskPriority,
    #[serde(default)]
    kind: TaskKind,
    #[serde(default)]
    required_capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<TaskSpec>,
}

impl From<TaskSpec> for Task {
    fn from(spec: TaskSpec) -> Self {
        let description = if spec.description.is_empty() {
            spec.title.clone()
        } else {
            spec.description
        };
        let mut task = Task::new(spec.title, description)
            .with_priority(spec.priority)
            .with_kind(spec.kind);
        for capability in spec.required_capabilities {
            task = task.requiring(capability);
        }
        task
    }
}

fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading task file {}", path.display()))?;
    let file: TaskFile =
        toml::from_str(&raw).with_context(|| format!("parsing task file {}", path.display()))?;
    Ok(file.tasks.into_iter().map(Task::from).collect())
}

fn load_config(path: Option<&Path>, offline: bool) -> Result<SwarmConfig> {
    let mut config = SwarmConfig::load(path).context("loading swarm configuration")?;
    if offline {
        config.offline = true;
    }
    Ok(config)
}

async fn run(
    config: SwarmConfig,
    tasks: Vec<Task>,
    timeout: Duration,
    grace: Option<Duration>,
) -> Result<()> {
    let cache = Arc::new(ModelAvailabilityCache::new(config.availability_ttl()));
    let router = Arc::new(CostAwareRouter::new(config.router.clone()).with_availability(cache));
    let provider = build_provider(&config, router.clone()).context("building inference provider")?;

    let mut builder = SwarmOrchestrator::builder(config.clone(), Arc::new(provider))
        .with_router(router.clone())
        .with_status_sink(Arc::new(LogStatusSink));
    if let Some(path) = &config.status_file {
        builder = builder.with_status_sink(Arc::new(JsonFileStatusSink::new(path)));
    }
    if !config.offline {
        builder = builder.with_availability_probe(Arc::new(HttpAvailabilityProbe::new(&config)));
    }
    let swarm = builder.build().context("building swarm")?;

    swarm.start().await.context("starting swarm")?;
    for task in tasks {
        swarm.submit(task).await.context("submitting task")?;
    }

    tokio::select! {
        idle = swarm.wait_until_idle(timeout) => {
            if idle {
                info!("Queue drained");
            } else {
                warn!(timeout_secs = timeout.as_secs(), "Timed out waiting for the queue to drain");
            }
        }
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, shutting down"),
    }
    match grace {
        Some(grace) => swarm.stop(grace).await,
        None => swarm.shutdown().await,
    }

    let stats = swarm.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    for line in router.optimization_recommendations().await {
        info!(recommendation = %line, "Routing");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    match args.command {
        Command::Run {
            offline,
            tasks,
            task,
            timeout_secs,
            grace_secs,
        } => {
            let config = load_config(args.config.as_deref(), offline)?;
            let mut queued = match tasks {
                Some(path) => load_tasks(&path)?,
                None => Vec::new(),
            };
            queued.extend(task.into_iter().map(|title| Task::new(title.clone(), title)));
            if queued.is_empty() {
                anyhow::bail!("nothing to do: pass --tasks <file> or --task <title>");
            }
            info!(
                workers = config.workers.len(),
                tasks = queued.len(),
                offline = config.offline,
                "Swarm starting"
            );
            run(
                config,
                queued,
                Duration::from_secs(timeout_secs),
                grace_secs.map(Duration::from_secs),
            )
            .await
        }
        Command::Route {
            prompt,
            priority,
            kind,
        } => {
            let config = load_config(args.config.as_deref(), false)?;
            let priority: TaskPriority = priority.parse().map_err(anyhow::Error::msg)?;
            let kind: TaskKind = kind.parse().map_err(anyhow::Error::msg)?;
            let task = Task::new(prompt.clone(), prompt.clone())
                .with_priority(priority)
                .with_kind(kind);

            let router = CostAwareRouter::new(config.router.clone());
            let choice = router.select_model(&task, &prompt).await;
            println!("{}", serde_json::to_string_pretty(&choice)?);
            router.cancel(choice).await;
            Ok(())
        }
        Command::Gate { solution } => {
            let config = load_config(args.config.as_deref(), false)?;
            let raw = std::fs::read_to_string(&solution)
                .with_context(|| format!("reading solution {}", solution.display()))?;
            let parsed: AgentSolution = serde_json::from_str(&raw)
                .with_context(|| format!("parsing solution {}", solution.display()))?;

            let mut gate = QualityGate::new(config.gate.clone());
            if let Some(root) = &config.workspace_root {
                gate = gate.with_workspace(Arc::new(FsWorkspace::new(root)));
            }
            let report = gate.validate(&parsed);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
