//! Tracing setup and status sinks.
//!
//! Two sinks:
//! - [`LogStatusSink`]: one `info!` line per monitor tick
//! - [`JsonFileStatusSink`]: latest [`SwarmStatus`] snapshot, overwritten on every tick

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::orchestrator::{StatusSink, SwarmStatus};

/// Install the global `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {e}"))
}

/// Logs a one-line summary of each status push.
#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, status: &SwarmStatus) {
        let stats = &status.stats;
        info!(
            total = stats.queue.total,
            pending = stats.queue.pending,
            in_progress = stats.queue.in_progress,
            completed = stats.queue.completed,
            failed = stats.queue.failed,
            busy = stats.workers_busy,
            idle = stats.workers_idle,
            unhealthy = stats.workers_unhealthy,
            restarts = stats.restarts,
            "Swarm status"
        );
    }
}

/// Writes the latest status as pretty JSON. Failures are logged and never
/// interrupt the swarm.
#[derive(Debug, Clone)]
pub struct JsonFileStatusSink {
    path: PathBuf,
}

impl JsonFileStatusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusSink for JsonFileStatusSink {
    fn publish(&self, status: &SwarmStatus) {
        write_status(status, &self.path);
    }
}

/// Write `status` to `path`, replacing any previous snapshot.
pub fn write_status(status: &SwarmStatus, path: &Path) {
    match serde_json::to_string_pretty(status) {
        Ok(json) => {
            let tmp = path.with_extension("json.tmp");
            let written = std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, path));
            if let Err(e) = written {
                warn!(path = %path.display(), "Failed to write swarm status: {e}");
            }
        }
        Err(e) => warn!("Failed to serialize swarm status: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SwarmStats;
    use chrono::Utc;
    use coordination::events::BusStats;
    use coordination::queue::QueueStats;

    fn status(completed: usize) -> SwarmStatus {
        SwarmStatus {
            timestamp: Utc::now(),
            stats: SwarmStats {
                queue: QueueStats {
                    total: completed,
                    completed,
                    ..Default::default()
                },
                workers_total: 1,
                workers_busy: 0,
                workers_idle: 1,
                workers_unhealthy: 0,
                restarts: 0,
                tasks_completed: completed as u64,
                tasks_failed: 0,
                bus: BusStats::default(),
                usage: None,
                uptime_secs: 3,
            },
            workers: vec![],
        }
    }

    #[test]
    fn test_json_sink_overwrites_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileStatusSink::new(dir.path().join("status.json"));

        sink.publish(&status(1));
        sink.publish(&status(2));

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        let back: SwarmStatus = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.stats.queue.completed, 2);
        assert!(!dir.path().join("status.json.tmp").exists());
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let sink = JsonFileStatusSink::new("/nonexistent/dir/status.json");
        sink.publish(&status(1));
    }
}
