//! Swarm orchestrator: worker pool, health monitor and status reporting.
//!
//! ```text
//!             submit
//!               │
//!               ▼
//!          TaskQueue ◀──claim/complete/fail──  AgentWorker × N
//!               ▲                                   │ WorkerMessage
//!    release /  │                                   ▼
//!    fail       └───────────────────────────  monitor loop ──▶ SwarmEvent (broadcast)
//!                                                   │       ──▶ swarm.health (bus)
//!                                                   ▼
//!                                              StatusSink
//! ```
//!
//! A worker that stays silent for longer than the heartbeat timeout is
//! aborted and replaced by a fresh instance with the same id. Its claimed
//! task goes back to pending, or is failed once it has been released
//! `max_releases_per_task` times.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coordination::cognition::{
    AgentSpecialization, CognitivePipeline, InferenceProvider, ProjectContext,
    ProjectContextProvider, StaticProjectContext, WorkspaceScanner,
};
use coordination::events::{BusStats, MessageBus, SharedMessageBus, TOPIC_SWARM_HEALTH};
use coordination::queue::{
    QueueResult, QueueStats, SharedTaskQueue, Task, TaskId, TaskQueue, TaskStatus,
};
use coordination::router::{AvailabilityProbe, CostAwareRouter, UsageSnapshot};
use coordination::verifier::{FsWorkspace, QualityGate};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SwarmConfig, WorkerSpec};
use crate::worker::{AgentWorker, WorkerContext, WorkerMessage, WorkerReport};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("swarm already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

// ── Worker records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Starting,
    Idle,
    Busy,
    Unhealthy,
    Stopped,
}

/// Outward view of one worker slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub specialization: String,
    pub health: WorkerHealth,
    pub current_task: Option<TaskId>,
    pub last_activity: DateTime<Utc>,
    pub completed: u64,
    pub failed: u64,
    pub restarts: u32,
    pub generation: u64,
}

struct WorkerRecord {
    view: WorkerSnapshot,
    last_heartbeat: Instant,
}

struct WorkerSlot {
    spec: WorkerSpec,
    specialization: AgentSpecialization,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    cancel: CancellationToken,
}

// ── Events and status ────────────────────────────────────────────────────────

/// Lifecycle events, fanned out to every [`SwarmOrchestrator::subscribe_events`] receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwarmEvent {
    WorkerStarted { worker: String, generation: u64 },
    TaskSubmitted { task_id: TaskId, title: String },
    TaskClaimed { worker: String, task_id: TaskId },
    TaskCompleted { worker: String, task_id: TaskId, score: f64 },
    TaskFailed { worker: String, task_id: TaskId, reason: String },
    WorkerUnhealthy { worker: String, silent_ms: u64 },
    TaskReleased { worker: String, task_id: TaskId },
    TaskAbandoned { worker: String, task_id: TaskId, releases: u32 },
    WorkerRestarted { worker: String, generation: u64 },
    WorkerStopped { worker: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmStats {
    pub queue: QueueStats,
    pub workers_total: usize,
    pub workers_busy: usize,
    pub workers_idle: usize,
    pub workers_unhealthy: usize,
    pub restarts: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub bus: BusStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSnapshot>,
    pub uptime_secs: u64,
}

/// What the orchestrator pushes to its sinks every monitor tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmStatus {
    pub timestamp: DateTime<Utc>,
    pub stats: SwarmStats,
    pub workers: Vec<WorkerSnapshot>,
}

/// Outward reporting interface. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &SwarmStatus);
}

// ── Builder ──────────────────────────────────────────────────────────────────

pub struct SwarmBuilder {
    config: SwarmConfig,
    provider: Arc<dyn InferenceProvider>,
    router: Option<Arc<CostAwareRouter>>,
    probe: Option<Arc<dyn AvailabilityProbe>>,
    context: Option<Arc<dyn ProjectContextProvider>>,
    queue: Option<SharedTaskQueue>,
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl SwarmBuilder {
    /// Router whose usage is reported in [`SwarmStats::usage`].
    pub fn with_router(mut self, router: Arc<CostAwareRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Refreshes the router's availability cache once per TTL.
    pub fn with_availability_probe(mut self, probe: Arc<dyn AvailabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ProjectContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    /// Use an existing queue, e.g. one restored from a previous run.
    pub fn with_queue(mut self, queue: SharedTaskQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> OrchestratorResult<SwarmOrchestrator> {
        self.config.validate()?;
        if self.config.heartbeat_timeout() <= self.config.pipeline.call_timeout {
            warn!(
                heartbeat_timeout_ms = self.config.heartbeat_timeout().as_millis() as u64,
                call_timeout_ms = self.config.pipeline.call_timeout.as_millis() as u64,
                "Heartbeat timeout does not cover one inference call, slow calls will restart workers"
            );
        }

        let mut slots = Vec::with_capacity(self.config.workers.len());
        for spec in &self.config.workers {
            let specialization = self.config.specialization(&spec.specialization)?;
            slots.push(WorkerSlot {
                spec: spec.clone(),
                specialization,
            });
        }

        let mut gate = QualityGate::new(self.config.gate.clone());
        if let Some(root) = &self.config.workspace_root {
            gate = gate.with_workspace(Arc::new(FsWorkspace::new(root)));
        }

        let context: Arc<dyn ProjectContextProvider> = match (self.context, &self.config.workspace_root) {
            (Some(c), _) => c,
            (None, Some(root)) => Arc::new(WorkspaceScanner::new(root)),
            (None, None) => Arc::new(StaticProjectContext(ProjectContext::default())),
        };

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(SwarmOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                queue: self.queue.unwrap_or_else(|| TaskQueue::new().shared()),
                bus: MessageBus::new().shared(),
                gate: Arc::new(gate),
                provider: self.provider,
                router: self.router,
                probe: self.probe,
                context,
                sinks: self.sinks,
                slots,
                reports_tx,
                reports_rx: Mutex::new(Some(reports_rx)),
                events,
                cancel: CancellationToken::new(),
                monitor_cancel: CancellationToken::new(),
                state: Mutex::new(SwarmState::default()),
            }),
        })
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct SwarmState {
    started_at: Option<Instant>,
    records: BTreeMap<String, WorkerRecord>,
    handles: HashMap<String, WorkerHandle>,
    background: Vec<JoinHandle<()>>,
    restarts: u64,
}

struct Inner {
    config: SwarmConfig,
    queue: SharedTaskQueue,
    bus: SharedMessageBus,
    gate: Arc<QualityGate>,
    provider: Arc<dyn InferenceProvider>,
    router: Option<Arc<CostAwareRouter>>,
    probe: Option<Arc<dyn AvailabilityProbe>>,
    context: Arc<dyn ProjectContextProvider>,
    sinks: Vec<Arc<dyn StatusSink>>,
    slots: Vec<WorkerSlot>,
    reports_tx: mpsc::UnboundedSender<WorkerMessage>,
    reports_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerMessage>>>,
    events: broadcast::Sender<SwarmEvent>,
    /// Parent of every worker token
    cancel: CancellationToken,
    /// Stops the monitor once the workers are gone
    monitor_cancel: CancellationToken,
    state: Mutex<SwarmState>,
}

/// Owns the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct SwarmOrchestrator {
    inner: Arc<Inner>,
}

impl SwarmOrchestrator {
    pub fn builder(config: SwarmConfig, provider: Arc<dyn InferenceProvider>) -> SwarmBuilder {
        SwarmBuilder {
            config,
            provider,
            router: None,
            probe: None,
            context: None,
            queue: None,
            sinks: Vec::new(),
        }
    }

    pub fn queue(&self) -> &SharedTaskQueue {
        &self.inner.queue
    }

    pub fn bus(&self) -> &SharedMessageBus {
        &self.inner.bus
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.inner.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SwarmEvent> {
        self.inner.events.subscribe()
    }

    /// Reconcile leftover claims, spawn every worker and the monitor.
    pub async fn start(&self) -> OrchestratorResult<()> {
        let Some(reports) = self.inner.reports_rx.lock().await.take() else {
            return Err(OrchestratorError::AlreadyStarted);
        };

        let reconciled = self.inner.queue.release_all_in_progress().await;
        if !reconciled.is_empty() {
            info!(count = reconciled.len(), "Released tasks left in progress by a previous run");
        }

        let mut state = self.inner.state.lock().await;
        state.started_at = Some(Instant::now());
        for index in 0..self.inner.slots.len() {
            let id = self.inner.slots[index].spec.id.clone();
            let handle = self.inner.spawn_worker(index, 0);
            state.records.insert(id.clone(), self.inner.new_record(index));
            state.handles.insert(id.clone(), handle);
            self.inner.emit(SwarmEvent::WorkerStarted {
                worker: id,
                generation: 0,
            });
        }

        let inner = self.inner.clone();
        state.background.push(tokio::spawn(monitor(inner, reports)));
        if let Some(probe) = self.inner.probe.clone() {
            state.background.push(tokio::spawn(refresh_availability(self.inner.clone(), probe)));
        }
        info!(workers = self.inner.slots.len(), "Swarm started");
        Ok(())
    }

    /// Signal every worker to stop after its current iteration and wait up
    /// to `grace` for them. Stragglers are aborted mid-cognition; prefer
    /// [`shutdown`](Self::shutdown) unless the caller needs a hard limit.
    /// Tasks still in progress stay claimed until the next `start`
    /// reconciles them.
    pub async fn stop(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let (handles, background) = {
            let mut state = self.inner.state.lock().await;
            let handles: Vec<(String, WorkerHandle)> = state.handles.drain().collect();
            (handles, std::mem::take(&mut state.background))
        };

        // A grace too large to represent waits for the workers unconditionally.
        let deadline = Instant::now().checked_add(grace);
        let waits = handles.into_iter().map(|(id, handle)| async move {
            let WorkerHandle { mut join, .. } = handle;
            let finished = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut join).await.is_ok(),
                None => {
                    let _ = (&mut join).await;
                    true
                }
            };
            if !finished {
                warn!(worker = %id, "Worker did not stop in time, aborting");
                join.abort();
            }
            id
        });
        let stopped = join_all(waits).await;
        {
            let mut state = self.inner.state.lock().await;
            for id in stopped {
                if let Some(record) = state.records.get_mut(&id) {
                    record.view.health = WorkerHealth::Stopped;
                    record.view.current_task = None;
                }
            }
        }

        self.inner.monitor_cancel.cancel();
        for mut task in background {
            if tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err() {
                task.abort();
            }
        }
        self.inner.publish_status().await;
        info!("Swarm stopped");
    }

    /// [`stop`](Self::stop) with a grace long enough for any in-flight claim
    /// to finish its cognition.
    pub async fn shutdown(&self) {
        self.stop(self.inner.config.shutdown_grace()).await;
    }

    pub async fn submit(&self, task: Task) -> QueueResult<TaskId> {
        let title = task.title.clone();
        let id = self.inner.queue.enqueue(task).await?;
        info!(task_id = %id, title = %title, "Task submitted");
        self.inner.emit(SwarmEvent::TaskSubmitted { task_id: id, title });
        Ok(id)
    }

    pub async fn stats(&self) -> SwarmStats {
        self.inner.stats().await
    }

    pub async fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        self.inner.snapshots().await
    }

    pub async fn status(&self) -> SwarmStatus {
        self.inner.status().await
    }

    /// Wait until nothing is pending or in progress. Returns false on
    /// timeout.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let poll = self.inner.config.poll_interval();
        let idle = async {
            loop {
                let stats = self.inner.queue.stats().await;
                if stats.pending == 0 && stats.in_progress == 0 {
                    return;
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}

impl Inner {
    fn emit(&self, event: SwarmEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn new_record(&self, index: usize) -> WorkerRecord {
        let slot = &self.slots[index];
        WorkerRecord {
            view: WorkerSnapshot {
                id: slot.spec.id.clone(),
                specialization: slot.specialization.name.clone(),
                health: WorkerHealth::Starting,
                current_task: None,
                last_activity: Utc::now(),
                completed: 0,
                failed: 0,
                restarts: 0,
                generation: 0,
            },
            last_heartbeat: Instant::now(),
        }
    }

    fn spawn_worker(&self, index: usize, generation: u64) -> WorkerHandle {
        let slot = &self.slots[index];
        let pipeline = CognitivePipeline::new(
            slot.spec.id.clone(),
            slot.specialization.clone(),
            self.provider.clone(),
        )
        .with_context(self.context.clone())
        .with_config(self.config.pipeline.clone());

        let ctx = WorkerContext {
            queue: self.queue.clone(),
            bus: self.bus.clone(),
            gate: self.gate.clone(),
            reports: self.reports_tx.clone(),
            poll_interval: self.config.poll_interval(),
            heartbeat_interval: self.config.heartbeat_interval(),
            max_gate_attempts: self.config.max_gate_attempts,
        };
        let worker = AgentWorker::new(generation, slot.spec.capabilities.clone(), pipeline, ctx);
        let cancel = self.cancel.child_token();
        let join = tokio::spawn(worker.run(cancel.clone()));
        WorkerHandle { join, cancel }
    }

    async fn apply_report(&self, msg: WorkerMessage) {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(&msg.worker_id) else {
            debug!(worker = %msg.worker_id, "Report from unknown worker ignored");
            return;
        };
        if record.view.generation != msg.generation {
            debug!(
                worker = %msg.worker_id,
                generation = msg.generation,
                current = record.view.generation,
                "Report from replaced worker ignored"
            );
            return;
        }

        record.last_heartbeat = Instant::now();
        record.view.last_activity = Utc::now();
        let worker = msg.worker_id;
        match msg.report {
            WorkerReport::Heartbeat => {
                if matches!(record.view.health, WorkerHealth::Starting | WorkerHealth::Unhealthy) {
                    record.view.health = if record.view.current_task.is_some() {
                        WorkerHealth::Busy
                    } else {
                        WorkerHealth::Idle
                    };
                }
            }
            WorkerReport::TaskClaimed { task_id } => {
                record.view.health = WorkerHealth::Busy;
                record.view.current_task = Some(task_id);
                self.emit(SwarmEvent::TaskClaimed { worker, task_id });
            }
            WorkerReport::Progress { event } => {
                debug!(worker = %worker, task_id = %event.task_id(), "Worker progress");
            }
            WorkerReport::TaskCompleted {
                task_id,
                score,
                gate_attempts,
            } => {
                record.view.health = WorkerHealth::Idle;
                record.view.current_task = None;
                record.view.completed += 1;
                debug!(worker = %worker, task_id = %task_id, gate_attempts, "Completion recorded");
                self.emit(SwarmEvent::TaskCompleted {
                    worker,
                    task_id,
                    score,
                });
            }
            WorkerReport::TaskFailed { task_id, reason } => {
                record.view.health = WorkerHealth::Idle;
                record.view.current_task = None;
                record.view.failed += 1;
                self.emit(SwarmEvent::TaskFailed {
                    worker,
                    task_id,
                    reason,
                });
            }
            WorkerReport::Stopped => {
                record.view.health = WorkerHealth::Stopped;
                record.view.current_task = None;
                self.emit(SwarmEvent::WorkerStopped { worker });
            }
        }
    }

    /// Find silent workers and recover each one.
    async fn check_health(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let timeout = self.config.heartbeat_timeout();
        let now = Instant::now();
        let silent: Vec<(String, Duration)> = {
            let state = self.state.lock().await;
            state
                .records
                .values()
                .filter(|r| r.view.health != WorkerHealth::Stopped)
                .filter_map(|r| {
                    let silent = now.saturating_duration_since(r.last_heartbeat);
                    (silent > timeout).then(|| (r.view.id.clone(), silent))
                })
                .collect()
        };
        for (worker, silent) in silent {
            self.recover(&worker, silent).await;
        }
    }

    /// Abort a silent worker, hand back its task and start a replacement.
    async fn recover(&self, worker: &str, silent: Duration) {
        let Some(index) = self.slots.iter().position(|s| s.spec.id == worker) else {
            return;
        };
        let silent_ms = silent.as_millis() as u64;
        warn!(worker = %worker, silent_ms, "Worker unhealthy, restarting");
        self.emit(SwarmEvent::WorkerUnhealthy {
            worker: worker.to_string(),
            silent_ms,
        });

        // Bumping the generation first drops any report the old instance
        // sends before the abort lands.
        let (old, generation) = {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(worker) else {
                return;
            };
            record.view.health = WorkerHealth::Unhealthy;
            record.view.generation += 1;
            let generation = record.view.generation;
            (state.handles.remove(worker), generation)
        };
        if let Some(old) = old {
            old.cancel.cancel();
            old.join.abort();
            let _ = old.join.await;
        }

        let held: Vec<Task> = self
            .queue
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress && t.assigned_worker.as_deref() == Some(worker))
            .collect();
        let mut released = Vec::new();
        for task in held {
            if task.releases >= self.config.max_releases_per_task {
                let reason = format!(
                    "abandoned after {} releases: worker {worker} stopped responding",
                    task.releases
                );
                if self.queue.fail(&task.id, reason).await {
                    warn!(worker = %worker, task_id = %task.id, releases = task.releases, "Task abandoned");
                    self.emit(SwarmEvent::TaskAbandoned {
                        worker: worker.to_string(),
                        task_id: task.id,
                        releases: task.releases,
                    });
                }
            } else if self.queue.release(&task.id).await {
                released.push(task.id);
                self.emit(SwarmEvent::TaskReleased {
                    worker: worker.to_string(),
                    task_id: task.id,
                });
            }
        }

        let handle = self.spawn_worker(index, generation);
        {
            let mut state = self.state.lock().await;
            state.restarts += 1;
            if let Some(record) = state.records.get_mut(worker) {
                record.view.restarts += 1;
                record.view.current_task = None;
                record.last_heartbeat = Instant::now();
            }
            state.handles.insert(worker.to_string(), handle);
        }
        info!(worker = %worker, generation, "Worker restarted");
        self.emit(SwarmEvent::WorkerRestarted {
            worker: worker.to_string(),
            generation,
        });
        self.bus
            .publish(
                "orchestrator",
                TOPIC_SWARM_HEALTH,
                json!({
                    "worker": worker,
                    "status": "restarted",
                    "generation": generation,
                    "silent_ms": silent_ms,
                    "released": released,
                }),
            )
            .await;
    }

    async fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let state = self.state.lock().await;
        state.records.values().map(|r| r.view.clone()).collect()
    }

    async fn stats(&self) -> SwarmStats {
        let queue = self.queue.stats().await;
        let bus = self.bus.stats().await;
        let usage = match &self.router {
            Some(router) => Some(router.usage().await),
            None => None,
        };

        let state = self.state.lock().await;
        let count = |h: WorkerHealth| state.records.values().filter(|r| r.view.health == h).count();
        SwarmStats {
            queue,
            workers_total: state.records.len(),
            workers_busy: count(WorkerHealth::Busy),
            workers_idle: count(WorkerHealth::Idle),
            workers_unhealthy: count(WorkerHealth::Unhealthy),
            restarts: state.restarts,
            tasks_completed: state.records.values().map(|r| r.view.completed).sum(),
            tasks_failed: state.records.values().map(|r| r.view.failed).sum(),
            bus,
            usage,
            uptime_secs: state.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0),
        }
    }

    async fn status(&self) -> SwarmStatus {
        SwarmStatus {
            timestamp: Utc::now(),
            stats: self.stats().await,
            workers: self.snapshots().await,
        }
    }

    async fn publish_status(&self) {
        if self.sinks.is_empty() {
            return;
        }
        let status = self.status().await;
        for sink in &self.sinks {
            sink.publish(&status);
        }
    }
}

async fn monitor(inner: Arc<Inner>, mut reports: mpsc::UnboundedReceiver<WorkerMessage>) {
    let mut tick = tokio::time::interval(inner.config.monitor_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = inner.monitor_cancel.cancelled() => break,
            Some(msg) = reports.recv() => inner.apply_report(msg).await,
            _ = tick.tick() => {
                inner.check_health().await;
                inner.publish_status().await;
            }
        }
    }
    // Reports sent by workers on their way out.
    while let Ok(msg) = reports.try_recv() {
        inner.apply_report(msg).await;
    }
    debug!("Monitor loop exited");
}

async fn refresh_availability(inner: Arc<Inner>, probe: Arc<dyn AvailabilityProbe>) {
    let Some(cache) = inner.router.as_ref().and_then(|r| r.availability().cloned()) else {
        return;
    };
    let mut tick = tokio::time::interval(cache.ttl());
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tick.tick() => {
                let probed = cache.refresh(probe.as_ref()).await;
                debug!(probed, "Availability cache refreshed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{OfflineBackend, RoutedInference};
    use coordination::router::{ModelTier, RouterConfig};
    use std::sync::Mutex as StdMutex;

    /// Offline answers, each after a delay.
    struct Slow {
        inner: Arc<dyn InferenceProvider>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl InferenceProvider for Slow {
        async fn complete(
            &self,
            prompt: &str,
            hint: &coordination::cognition::ModelHint,
        ) -> coordination::cognition::ProviderResult<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.complete(prompt, hint).await
        }
    }

    #[derive(Default)]
    struct RecordingSink(StdMutex<Vec<SwarmStatus>>);

    impl StatusSink for RecordingSink {
        fn publish(&self, status: &SwarmStatus) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(status.clone());
            }
        }
    }

    fn fast_config() -> SwarmConfig {
        SwarmConfig {
            workers: vec![
                WorkerSpec::new("w-backend", "backend"),
                WorkerSpec::new("w-qa", "qa"),
            ],
            poll_interval_ms: 10,
            heartbeat_interval_ms: 20,
            monitor_interval_ms: 20,
            offline: true,
            ..Default::default()
        }
    }

    fn offline() -> (Arc<CostAwareRouter>, Arc<dyn InferenceProvider>) {
        let router = Arc::new(CostAwareRouter::new(RouterConfig::default()));
        let provider = RoutedInference::new(router.clone())
            .with_backend(ModelTier::Local, Arc::new(OfflineBackend));
        (router, Arc::new(provider))
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let (_, provider) = offline();
        let config = SwarmConfig {
            workers: vec![],
            ..fast_config()
        };
        assert!(matches!(
            SwarmOrchestrator::builder(config, provider).build(),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_, provider) = offline();
        let swarm = SwarmOrchestrator::builder(fast_config(), provider).build().unwrap();
        swarm.start().await.unwrap();
        assert!(matches!(swarm.start().await, Err(OrchestratorError::AlreadyStarted)));
        swarm.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_start_reconciles_stale_claims() {
        let queue = TaskQueue::new().shared();
        let id = queue.enqueue(Task::new("left over", "from last run")).await.unwrap();
        queue.claim_next("ghost", &[]).await.unwrap();

        let (_, provider) = offline();
        let swarm = SwarmOrchestrator::builder(fast_config(), provider)
            .with_queue(queue.clone())
            .build()
            .unwrap();
        swarm.start().await.unwrap();
        assert!(swarm.wait_until_idle(Duration::from_secs(10)).await);
        let task = queue.get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.releases, 1);
        swarm.stop(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn test_shutdown_lets_inflight_cognition_finish() {
        let (_, offline) = offline();
        let provider = Arc::new(Slow {
            inner: offline,
            delay: Duration::from_millis(150),
        });
        let config = SwarmConfig {
            workers: vec![WorkerSpec::new("w-backend", "backend")],
            heartbeat_interval_ms: 100,
            heartbeat_timeout_multiplier: 20,
            pipeline: coordination::cognition::PipelineConfig {
                call_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            ..fast_config()
        };
        let swarm = SwarmOrchestrator::builder(config, provider).build().unwrap();
        let mut events = swarm.subscribe_events();
        swarm.start().await.unwrap();
        let id = swarm.submit(Task::new("Add cache", "Cache lookups")).await.unwrap();

        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Ok(SwarmEvent::TaskClaimed { .. })) => break,
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                other => panic!("task never claimed: {other:?}"),
            }
        }
        // First call is still sleeping when shutdown starts.
        swarm.shutdown().await;

        let task = swarm.queue().get(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let stats = swarm.stats().await;
        assert_eq!(stats.tasks_completed, 1);
        assert_eq!(stats.restarts, 0);
    }

    #[tokio::test]
    async fn test_offline_swarm_drains_queue() {
        let (router, provider) = offline();
        let sink = Arc::new(RecordingSink::default());
        let swarm = SwarmOrchestrator::builder(fast_config(), provider)
            .with_router(router)
            .with_status_sink(sink.clone())
            .build()
            .unwrap();
        let mut events = swarm.subscribe_events();
        swarm.start().await.unwrap();

        for i in 0..4 {
            swarm
                .submit(Task::new(format!("Task {i}"), "Implement the thing"))
                .await
                .unwrap();
        }
        assert!(swarm.wait_until_idle(Duration::from_secs(10)).await);
        swarm.stop(Duration::from_secs(5)).await;

        let stats = swarm.stats().await;
        assert_eq!(stats.queue.completed, 4);
        assert_eq!(stats.tasks_completed, 4);
        assert_eq!(stats.restarts, 0);
        let usage = stats.usage.unwrap();
        assert_eq!(usage.total_calls(), usage.calls(ModelTier::Local));
        assert!(usage.total_calls() >= 8);

        let snapshots = swarm.worker_snapshots().await;
        assert!(snapshots.iter().all(|w| w.health == WorkerHealth::Stopped));

        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SwarmEvent::TaskCompleted { .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 4);
        assert!(!sink.0.lock().unwrap().is_empty());
    }
}
