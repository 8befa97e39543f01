//! Priority task queue with atomic claim semantics.
//!
//! All mutations go through a single async mutex, so the
//! "find eligible → mark in progress" sequence in [`TaskQueue::claim_next`]
//! can never hand the same task to two workers.
//!
//! Completion, failure, release and cancellation are idempotent: calling them
//! on an unknown task or a task in the wrong state is logged and ignored.
//! Workers report asynchronously and routinely race the orchestrator's
//! release-on-timeout, so these calls must never fail.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::task::{Task, TaskId, TaskStatus};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Task already queued: {0}")]
    DuplicateTask(TaskId),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Shared reference to a TaskQueue
pub type SharedTaskQueue = Arc<TaskQueue>;

/// Counts of tasks per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Ordering key for pending tasks: priority rank, then insertion sequence.
type PendingKey = (u8, u64, TaskId);

struct Entry {
    task: Task,
    seq: u64,
}

impl Entry {
    fn pending_key(&self) -> PendingKey {
        (self.task.priority.rank(), self.seq, self.task.id)
    }
}

#[derive(Default)]
struct QueueState {
    entries: HashMap<TaskId, Entry>,
    pending: BTreeSet<PendingKey>,
    next_seq: u64,
}

impl QueueState {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, task: Task) {
        let seq = self.bump_seq();
        let entry = Entry { task, seq };
        if entry.task.status == TaskStatus::Pending {
            self.pending.insert(entry.pending_key());
        }
        self.entries.insert(entry.task.id, entry);
    }

    /// Move an in-progress entry back to pending. Caller checks the state.
    fn release_entry(&mut self, id: &TaskId) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.task.status = TaskStatus::Pending;
        entry.task.assigned_worker = None;
        entry.task.started_at = None;
        entry.task.releases += 1;
        entry.task.touch();
        let key = entry.pending_key();
        self.pending.insert(key);
        true
    }
}

/// The shared work queue.
///
/// Tasks are served highest priority first, FIFO within a priority band.
pub struct TaskQueue {
    state: Mutex<QueueState>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Create a shared reference to this queue
    pub fn shared(self) -> SharedTaskQueue {
        Arc::new(self)
    }

    /// Insert a new task as `pending`.
    ///
    /// Any status, assignment or outcome carried by the task is reset.
    /// Returns [`QueueError::DuplicateTask`] if the id is already queued.
    pub async fn enqueue(&self, mut task: Task) -> QueueResult<TaskId> {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&task.id) {
            warn!(task_id = %task.id, "Rejected duplicate enqueue");
            return Err(QueueError::DuplicateTask(task.id));
        }

        task.status = TaskStatus::Pending;
        task.assigned_worker = None;
        task.started_at = None;
        task.completed_at = None;
        task.result = None;
        task.error = None;
        task.touch();

        let id = task.id;
        debug!(task_id = %id, priority = %task.priority, "Task enqueued");
        state.insert(task);
        Ok(id)
    }

    /// Insert tasks verbatim, keeping their status.
    ///
    /// Used when a collaborator restores queue state from storage. Tasks left
    /// `in_progress` by a previous process should be reconciled afterwards
    /// with [`TaskQueue::release_all_in_progress`]. Duplicates are skipped.
    pub async fn restore(&self, tasks: impl IntoIterator<Item = Task>) -> usize {
        let mut state = self.state.lock().await;
        let mut restored = 0;
        for task in tasks {
            if state.entries.contains_key(&task.id) {
                warn!(task_id = %task.id, "Skipping duplicate task during restore");
                continue;
            }
            state.insert(task);
            restored += 1;
        }
        restored
    }

    /// Atomically claim the best eligible pending task for a worker.
    ///
    /// Returns `None` when nothing is pending or no pending task's
    /// requirements are covered by `capabilities`.
    pub async fn claim_next(&self, worker_id: &str, capabilities: &[String]) -> Option<Task> {
        let mut state = self.state.lock().await;

        let key = state
            .pending
            .iter()
            .find(|(_, _, id)| {
                state
                    .entries
                    .get(id)
                    .is_some_and(|e| e.task.matches_capabilities(capabilities))
            })
            .copied()?;

        state.pending.remove(&key);
        let entry = state.entries.get_mut(&key.2)?;
        let now = Utc::now();
        entry.task.status = TaskStatus::InProgress;
        entry.task.assigned_worker = Some(worker_id.to_string());
        entry.task.attempts += 1;
        entry.task.started_at = Some(now);
        entry.task.updated_at = now;

        debug!(
            task_id = %entry.task.id,
            worker = worker_id,
            priority = %entry.task.priority,
            attempt = entry.task.attempts,
            "Task claimed"
        );
        Some(entry.task.clone())
    }

    /// Mark an in-progress task completed with a result payload.
    ///
    /// Returns whether a transition happened. Repeated completions keep the
    /// first result.
    pub async fn complete(&self, id: &TaskId, result: serde_json::Value) -> bool {
        self.finish(id, TaskStatus::Completed, |task| task.result = Some(result))
            .await
    }

    /// Mark an in-progress task failed.
    pub async fn fail(&self, id: &TaskId, error: impl Into<String>) -> bool {
        let error = error.into();
        self.finish(id, TaskStatus::Failed, |task| task.error = Some(error))
            .await
    }

    async fn finish(&self, id: &TaskId, to: TaskStatus, apply: impl FnOnce(&mut Task)) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(id) else {
            debug!(task_id = %id, to = %to, "Ignoring report for unknown task");
            return false;
        };
        if entry.task.status != TaskStatus::InProgress {
            debug!(
                task_id = %id,
                status = %entry.task.status,
                to = %to,
                "Ignoring report for task not in progress"
            );
            return false;
        }

        apply(&mut entry.task);
        let now = Utc::now();
        entry.task.status = to;
        entry.task.completed_at = Some(now);
        entry.task.updated_at = now;
        info!(task_id = %id, status = %to, "Task finished");
        true
    }

    /// Return an in-progress task to pending.
    pub async fn release(&self, id: &TaskId) -> bool {
        let mut state = self.state.lock().await;
        match state.entries.get(id).map(|e| e.task.status) {
            Some(TaskStatus::InProgress) => {
                let released = state.release_entry(id);
                info!(task_id = %id, "Task released to pending");
                released
            }
            Some(status) => {
                debug!(task_id = %id, status = %status, "Ignoring release of task not in progress");
                false
            }
            None => {
                debug!(task_id = %id, "Ignoring release of unknown task");
                false
            }
        }
    }

    /// Release whatever in-progress task `worker_id` holds.
    pub async fn release_worker(&self, worker_id: &str) -> Vec<TaskId> {
        let mut state = self.state.lock().await;
        let held: Vec<TaskId> = state
            .entries
            .values()
            .filter(|e| {
                e.task.status == TaskStatus::InProgress
                    && e.task.assigned_worker.as_deref() == Some(worker_id)
            })
            .map(|e| e.task.id)
            .collect();
        for id in &held {
            state.release_entry(id);
            info!(task_id = %id, worker = worker_id, "Released task held by worker");
        }
        held
    }

    /// Release every in-progress task. Run once at startup to reconcile
    /// tasks left claimed by a previous shutdown.
    pub async fn release_all_in_progress(&self) -> Vec<TaskId> {
        let mut state = self.state.lock().await;
        let held: Vec<TaskId> = state
            .entries
            .values()
            .filter(|e| e.task.status == TaskStatus::InProgress)
            .map(|e| e.task.id)
            .collect();
        for id in &held {
            state.release_entry(id);
        }
        if !held.is_empty() {
            info!(count = held.len(), "Reconciled in-progress tasks back to pending");
        }
        held
    }

    /// Cancel a pending or in-progress task.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(id) else {
            debug!(task_id = %id, "Ignoring cancel of unknown task");
            return false;
        };
        if entry.task.is_terminal() {
            debug!(task_id = %id, status = %entry.task.status, "Ignoring cancel of finished task");
            return false;
        }
        let key = entry.pending_key();
        entry.task.status = TaskStatus::Cancelled;
        entry.task.completed_at = Some(Utc::now());
        entry.task.touch();
        state.pending.remove(&key);
        info!(task_id = %id, "Task cancelled");
        true
    }

    /// Explicitly re-queue a terminal task as pending.
    ///
    /// The task goes to the back of its priority band and keeps its attempt
    /// history; result and error are cleared.
    pub async fn requeue(&self, id: &TaskId) -> bool {
        let mut state = self.state.lock().await;
        let seq = state.bump_seq();
        let Some(entry) = state.entries.get_mut(id) else {
            debug!(task_id = %id, "Ignoring requeue of unknown task");
            return false;
        };
        if !entry.task.is_terminal() {
            debug!(task_id = %id, status = %entry.task.status, "Ignoring requeue of live task");
            return false;
        }
        entry.seq = seq;
        entry.task.status = TaskStatus::Pending;
        entry.task.assigned_worker = None;
        entry.task.started_at = None;
        entry.task.completed_at = None;
        entry.task.result = None;
        entry.task.error = None;
        entry.task.touch();
        let key = entry.pending_key();
        state.pending.insert(key);
        info!(task_id = %id, "Task re-queued");
        true
    }

    /// Get a copy of a task by id.
    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.state.lock().await.entries.get(id).map(|e| e.task.clone())
    }

    /// All tasks in insertion order.
    pub async fn snapshot(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats {
            total: state.entries.len(),
            ..Default::default()
        };
        for entry in state.entries.values() {
            match entry.task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Retention policy: keep only the `retain` most recently finished
    /// terminal tasks. Returns how many tasks were dropped.
    pub async fn prune_terminal(&self, retain: usize) -> usize {
        let mut state = self.state.lock().await;
        let mut terminal: Vec<(chrono::DateTime<Utc>, TaskId)> = state
            .entries
            .values()
            .filter(|e| e.task.is_terminal())
            .map(|e| (e.task.completed_at.unwrap_or(e.task.updated_at), e.task.id))
            .collect();
        if terminal.len() <= retain {
            return 0;
        }
        terminal.sort();
        let drop_count = terminal.len() - retain;
        for (_, id) in terminal.into_iter().take(drop_count) {
            state.entries.remove(&id);
        }
        debug!(dropped = drop_count, "Pruned terminal tasks");
        drop_count
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
