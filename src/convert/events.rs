//! Event types flowing through a conversion
//!
//! Two layers: [`WorkerEvent`] is the internal channel between worker tasks
//! and the session loop, one bounded mpsc per session. [`ConversionEvent`]
//! is what subscribers outside the crate see, whole snapshots only.

use crate::convert::aggregate::AggregatedProgress;
use crate::error::WorkerError;
use serde::Serialize;
use std::path::PathBuf;

/// Event emitted by one worker task into the session loop
#[derive(Debug)]
pub enum WorkerEvent {
    /// Process spawned successfully
    Started { worker: usize, pid: u32 },

    /// Progress line parsed from the worker's output
    Progress {
        worker: usize,
        current: u64,
        total: u64,
    },

    /// Resume marker: one unit was actually synthesized, not skipped
    Recovered { worker: usize, unit: usize },

    /// Process reached a terminal state; `Ok` means a clean exit 0
    Exited {
        worker: usize,
        result: Result<(), WorkerError>,
    },

    /// Process could not be spawned at all
    SpawnFailed { worker: usize, error: WorkerError },
}

impl WorkerEvent {
    /// Worker this event belongs to
    pub fn worker(&self) -> usize {
        match self {
            WorkerEvent::Started { worker, .. }
            | WorkerEvent::Progress { worker, .. }
            | WorkerEvent::Recovered { worker, .. }
            | WorkerEvent::Exited { worker, .. }
            | WorkerEvent::SpawnFailed { worker, .. } => *worker,
        }
    }
}

/// Event published to conversion subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionEvent {
    /// A fresh progress snapshot
    Progress(AggregatedProgress),

    /// The conversion reached a terminal outcome; always the last event
    Done(ConversionOutcome),
}

/// Terminal result of one conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    /// Whether an audiobook file was produced
    pub success: bool,

    /// Path of the assembled audiobook on success
    pub output: Option<PathBuf>,

    /// Failure description on error
    pub error: Option<String>,

    /// Run statistics, populated on success and failure alike
    pub analytics: RunAnalytics,
}

/// Statistics describing one conversion run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunAnalytics {
    /// Wall-clock duration of the run in seconds
    pub elapsed_secs: f64,

    /// Sentences synthesized during this run (excludes resume baseline)
    pub sentences_converted: u64,

    /// Synthesis rate over the run
    pub sentences_per_minute: f64,

    /// Size of the worker pool
    pub worker_count: usize,

    /// Workers that exhausted their retries
    pub failed_workers: usize,

    /// Whether this run resumed an earlier session
    pub resumed: bool,
}

impl RunAnalytics {
    pub fn from_run(
        elapsed_secs: f64,
        sentences_converted: u64,
        worker_count: usize,
        failed_workers: usize,
        resumed: bool,
    ) -> Self {
        let sentences_per_minute = if elapsed_secs > 0.0 {
            sentences_converted as f64 * 60.0 / elapsed_secs
        } else {
            0.0
        };
        Self {
            elapsed_secs,
            sentences_converted,
            sentences_per_minute,
            worker_count,
            failed_workers,
            resumed,
        }
    }
}
