//! Agent worker loop.
//!
//! One worker per pool slot. Each iteration: heartbeat, drain the mailbox,
//! claim the next eligible task, run cognition, gate the solution, and
//! report the outcome. Cancellation is checked between iterations only, so
//! a task in flight always finishes (or hangs until the orchestrator aborts
//! the worker).

use std::sync::Arc;
use std::time::Duration;

use coordination::cognition::{AgentSolution, CognitivePipeline, ThoughtEvent};
use coordination::events::{
    Mailbox, SharedMessageBus, TOPIC_AGENT_PROGRESS, TOPIC_TASK_CLAIMED, TOPIC_TASK_COMPLETED,
    TOPIC_TASK_FAILED,
};
use coordination::queue::{SharedTaskQueue, Task, TaskId, TaskResult};
use coordination::verifier::QualityGate;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a worker tells the orchestrator.
#[derive(Debug, Clone)]
pub enum WorkerReport {
    Heartbeat,
    TaskClaimed { task_id: TaskId },
    Progress { event: ThoughtEvent },
    TaskCompleted { task_id: TaskId, score: f64, gate_attempts: u32 },
    TaskFailed { task_id: TaskId, reason: String },
    Stopped,
}

/// A report stamped with the sender's identity and incarnation.
#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub worker_id: String,
    /// Bumped on every restart so reports from an aborted incarnation can
    /// be told apart
    pub generation: u64,
    pub report: WorkerReport,
}

/// Shared handles and loop settings for every worker in a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: SharedTaskQueue,
    pub bus: SharedMessageBus,
    pub gate: Arc<QualityGate>,
    pub reports: mpsc::UnboundedSender<WorkerMessage>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub max_gate_attempts: u32,
}

enum Outcome {
    Completed { score: f64, attempts: u32 },
    Failed(String),
}

pub struct AgentWorker {
    id: String,
    generation: u64,
    capabilities: Vec<String>,
    pipeline: CognitivePipeline,
    events: mpsc::UnboundedReceiver<ThoughtEvent>,
    ctx: WorkerContext,
}

impl AgentWorker {
    /// `pipeline` must not already have an event channel; the worker
    /// installs its own.
    pub fn new(
        generation: u64,
        capabilities: Vec<String>,
        pipeline: CognitivePipeline,
        ctx: WorkerContext,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let id = pipeline.agent_id().to_string();
        let mut capabilities = capabilities;
        for c in &pipeline.specialization().capabilities {
            if !capabilities.contains(c) {
                capabilities.push(c.clone());
            }
        }
        Self {
            id,
            generation,
            capabilities,
            pipeline: pipeline.with_events(tx),
            events,
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    fn report(&self, report: WorkerReport) {
        // The orchestrator going away is not the worker's problem.
        let _ = self.ctx.reports.send(WorkerMessage {
            worker_id: self.id.clone(),
            generation: self.generation,
            report,
        });
    }

    /// Run until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut mailbox = self.ctx.bus.register(&self.id).await;
        let idle_wait = self.ctx.poll_interval.min(self.ctx.heartbeat_interval);
        info!(
            worker = %self.id,
            generation = self.generation,
            specialization = %self.pipeline.specialization().name,
            "Worker started"
        );

        while !cancel.is_cancelled() {
            self.report(WorkerReport::Heartbeat);
            self.drain_mailbox(&mut mailbox);

            match self.ctx.queue.claim_next(&self.id, &self.capabilities).await {
                Some(task) => self.process(task).await,
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle_wait) => {}
                    }
                }
            }
        }

        self.ctx.bus.deregister(&self.id).await;
        self.report(WorkerReport::Stopped);
        info!(worker = %self.id, "Worker stopped");
    }

    fn drain_mailbox(&self, mailbox: &mut Mailbox) {
        while let Some(msg) = mailbox.try_recv() {
            info!(
                worker = %self.id,
                from = %msg.sender,
                target = %msg.target,
                payload = %msg.payload,
                "Message received"
            );
        }
    }

    async fn process(&mut self, task: Task) {
        let task_id = task.id;
        info!(worker = %self.id, task_id = %task_id, title = %task.title, attempt = task.attempts, "Task claimed");
        self.report(WorkerReport::TaskClaimed { task_id });
        self.ctx
            .bus
            .publish(
                &self.id,
                TOPIC_TASK_CLAIMED,
                json!({"task_id": task_id, "worker": self.id, "title": task.title}),
            )
            .await;

        match self.attempt(&task).await {
            Outcome::Completed { score, attempts } => {
                self.ctx
                    .bus
                    .publish(
                        &self.id,
                        TOPIC_TASK_COMPLETED,
                        json!({"task_id": task_id, "worker": self.id, "score": score}),
                    )
                    .await;
                self.report(WorkerReport::TaskCompleted {
                    task_id,
                    score,
                    gate_attempts: attempts,
                });
            }
            Outcome::Failed(reason) => {
                if !self.ctx.queue.fail(&task_id, reason.clone()).await {
                    debug!(worker = %self.id, task_id = %task_id, "Fail ignored, task no longer held");
                }
                warn!(worker = %self.id, task_id = %task_id, reason = %reason, "Task failed");
                self.ctx
                    .bus
                    .publish(
                        &self.id,
                        TOPIC_TASK_FAILED,
                        json!({"task_id": task_id, "worker": self.id, "reason": reason}),
                    )
                    .await;
                self.report(WorkerReport::TaskFailed { task_id, reason });
            }
        }
    }

    /// Cognition plus gate, retried up to `max_gate_attempts` times.
    async fn attempt(&mut self, task: &Task) -> Outcome {
        let max = self.ctx.max_gate_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=max {
            self.report(WorkerReport::Heartbeat);
            let solution = self.solve_with_progress(task).await;

            if !solution.option.is_viable() {
                last_reason = format!(
                    "selected option \"{}\" not viable (confidence {:.2})",
                    solution.option.title, solution.confidence
                );
                info!(worker = %self.id, task_id = %task.id, attempt, reason = %last_reason, "Solution rejected");
                continue;
            }

            let report = self.ctx.gate.validate(&solution);
            if !report.passed {
                last_reason = format!("quality gate: {}", report.summary());
                info!(worker = %self.id, task_id = %task.id, attempt, reason = %last_reason, "Solution rejected");
                continue;
            }

            let score = report.score;
            let result = TaskResult {
                solution,
                report,
                gate_attempts: attempt,
            };
            if !self.ctx.queue.complete(&task.id, result.to_value()).await {
                debug!(worker = %self.id, task_id = %task.id, "Complete ignored, task no longer held");
            }
            info!(worker = %self.id, task_id = %task.id, score, attempt, "Task completed");
            return Outcome::Completed {
                score,
                attempts: attempt,
            };
        }

        Outcome::Failed(format!("rejected after {max} attempt(s): {last_reason}"))
    }

    /// Run the pipeline while forwarding its progress events. Every event
    /// doubles as a heartbeat.
    async fn solve_with_progress(&mut self, task: &Task) -> AgentSolution {
        let solve = self.pipeline.solve(task);
        tokio::pin!(solve);

        let (thoughts, solution) = loop {
            tokio::select! {
                out = &mut solve => break out,
                Some(event) = self.events.recv() => {
                    forward(&self.id, self.generation, &self.ctx, event).await;
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            forward(&self.id, self.generation, &self.ctx, event).await;
        }

        if thoughts.progress.fallbacks > 0 {
            warn!(
                worker = %self.id,
                task_id = %task.id,
                fallbacks = thoughts.progress.fallbacks,
                "Cognition used fallbacks"
            );
        }
        solution
    }
}

async fn forward(worker_id: &str, generation: u64, ctx: &WorkerContext, event: ThoughtEvent) {
    let payload = serde_json::to_value(&event).unwrap_or_default();
    for report in [WorkerReport::Heartbeat, WorkerReport::Progress { event }] {
        let _ = ctx.reports.send(WorkerMessage {
            worker_id: worker_id.to_string(),
            generation,
            report,
        });
    }
    ctx.bus.publish(worker_id, TOPIC_AGENT_PROGRESS, payload).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{OfflineBackend, RoutedInference};
    use async_trait::async_trait;
    use coordination::cognition::{
        AgentSpecialization, InferenceProvider, ModelHint, ProviderError, ProviderResult,
    };
    use coordination::events::MessageBus;
    use coordination::queue::{TaskQueue, TaskStatus};
    use coordination::router::{CostAwareRouter, ModelTier, RouterConfig};

    struct Failing;

    #[async_trait]
    impl InferenceProvider for Failing {
        async fn complete(&self, _: &str, _: &ModelHint) -> ProviderResult<String> {
            Err(ProviderError::Unavailable("down".into()))
        }
    }

    fn offline_provider() -> Arc<dyn InferenceProvider> {
        let router = Arc::new(CostAwareRouter::new(RouterConfig::default()));
        Arc::new(RoutedInference::new(router).with_backend(ModelTier::Local, Arc::new(OfflineBackend)))
    }

    fn context() -> (WorkerContext, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            queue: TaskQueue::new().shared(),
            bus: MessageBus::new().shared(),
            gate: Arc::new(QualityGate::default()),
            reports: tx,
            poll_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(50),
            max_gate_attempts: 2,
        };
        (ctx, rx)
    }

    fn worker(provider: Arc<dyn InferenceProvider>, ctx: WorkerContext) -> AgentWorker {
        let pipeline = CognitivePipeline::new("w-1", AgentSpecialization::backend(), provider);
        AgentWorker::new(0, vec![], pipeline, ctx)
    }

    async fn wait_for_terminal(queue: &SharedTaskQueue, id: &TaskId) -> Task {
        for _ in 0..200 {
            if let Some(task) = queue.get(id).await {
                if task.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never finished");
    }

    #[tokio::test]
    async fn test_worker_completes_task_offline() {
        let (ctx, mut rx) = context();
        let queue = ctx.queue.clone();
        let bus = ctx.bus.clone();
        let mut completed = bus.subscribe(TOPIC_TASK_COMPLETED, "observer").await;
        let id = queue.enqueue(Task::new("Add cache", "Cache lookups")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker(offline_provider(), ctx).run(cancel.clone()));

        let task = wait_for_terminal(&queue, &id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        let result = TaskResult::from_value(task.result.as_ref().unwrap()).unwrap();
        assert!(result.report.passed);
        assert_eq!(result.gate_attempts, 1);
        assert_eq!(result.solution.option.title, "Focused module change");

        let msg = completed.recv().await.unwrap();
        assert_eq!(msg.payload["worker"], "w-1");

        cancel.cancel();
        handle.await.unwrap();

        let mut saw_claim = false;
        let mut saw_progress = false;
        let mut saw_stop = false;
        while let Ok(m) = rx.try_recv() {
            match m.report {
                WorkerReport::TaskClaimed { task_id } => saw_claim = task_id == id,
                WorkerReport::Progress { .. } => saw_progress = true,
                WorkerReport::Stopped => saw_stop = true,
                _ => {}
            }
        }
        assert!(saw_claim && saw_progress && saw_stop);
        assert!(!bus.is_registered("w-1").await);
    }

    #[tokio::test]
    async fn test_fallback_solution_fails_after_max_attempts() {
        let (ctx, mut rx) = context();
        let queue = ctx.queue.clone();
        let id = queue.enqueue(Task::new("Add cache", "Cache lookups")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker(Arc::new(Failing), ctx).run(cancel.clone()));

        let task = wait_for_terminal(&queue, &id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error.unwrap();
        assert!(error.contains("rejected after 2 attempt(s)"), "{error}");
        assert!(error.contains("not viable"), "{error}");

        cancel.cancel();
        handle.await.unwrap();
        let failed = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|m| matches!(m.report, WorkerReport::TaskFailed { .. }));
        assert!(failed);
    }

    #[tokio::test]
    async fn test_mailbox_messages_are_drained() {
        let (ctx, _rx) = context();
        let bus = ctx.bus.clone();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker(offline_provider(), ctx).run(cancel.clone()));

        for _ in 0..100 {
            if bus.is_registered("w-1").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(bus.send_direct("orchestrator", "w-1", json!({"hello": 1})).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bus.stats().await.direct_sent, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
