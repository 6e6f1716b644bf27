//! Worker state machine and the per-attempt process task
//!
//! Each pool slot owns one engine OS process at a time. The bookkeeping
//! lives in [`WorkerState`] and is only ever mutated by the session loop;
//! the spawned attempt task owns the child process and reports everything
//! it sees as [`WorkerEvent`]s. Killing is done from outside via the
//! process group, which the attempt task observes as an ordinary
//! signal-death exit.

use crate::convert::events::WorkerEvent;
use crate::engine::parse::{EngineLine, ProgressParser};
use crate::engine::WorkAssignment;
use crate::error::{StallKind, WorkerError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Lifecycle of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Not started yet, or waiting for a retry attempt
    Pending,
    Running,
    Complete,
    Error,
}

/// Bookkeeping for one pool slot, owned by the session loop
#[derive(Debug)]
pub struct WorkerState {
    /// Slot id, stable across retries
    pub id: usize,

    /// Assigned work, identical for every attempt
    pub assignment: WorkAssignment,

    pub status: WorkerStatus,

    /// Unit the engine last reported being on, relative to the assignment
    pub current_unit: u64,

    /// Units finished in the current attempt
    pub completed_units: u64,

    /// Units actually synthesized across all attempts (resume accounting)
    pub actual_conversions: u64,

    /// Retries consumed so far
    pub retry_count: u32,

    /// Pid of the running attempt
    pub pid: Option<u32>,

    pub started_at: Option<Instant>,
    pub last_progress_at: Option<Instant>,
    pub has_shown_progress: bool,

    /// Set by the watchdog just before it kills the process, so the exit
    /// can be attributed to the stall instead of a plain signal death
    pub pending_stall: Option<StallKind>,

    /// Terminal error of the last failed attempt
    pub last_error: Option<WorkerError>,

    marker_seen: bool,
}

impl WorkerState {
    pub fn new(id: usize, assignment: WorkAssignment) -> Self {
        Self {
            id,
            assignment,
            status: WorkerStatus::Pending,
            current_unit: 0,
            completed_units: 0,
            actual_conversions: 0,
            retry_count: 0,
            pid: None,
            started_at: None,
            last_progress_at: None,
            has_shown_progress: false,
            pending_stall: None,
            last_error: None,
            marker_seen: false,
        }
    }

    /// Size of the assignment in sentences
    pub fn assigned_units(&self) -> u64 {
        self.assignment.unit_count() as u64
    }

    /// Attempt spawned; progress restarts from the top of the assignment
    pub fn mark_started(&mut self, pid: u32, now: Instant) {
        self.status = WorkerStatus::Running;
        self.pid = Some(pid);
        self.started_at = Some(now);
        self.last_progress_at = None;
        self.has_shown_progress = false;
        self.current_unit = 0;
        self.completed_units = 0;
        self.pending_stall = None;
    }

    /// Progress line observed
    pub fn record_progress(&mut self, current: u64, now: Instant) {
        let completed = current.min(self.assigned_units());
        if completed > self.completed_units {
            // Without recovery markers the forward delta is the best
            // estimate of real synthesis work
            if !self.marker_seen {
                self.actual_conversions += completed - self.completed_units;
            }
            self.completed_units = completed;
        }
        self.current_unit = completed;
        self.last_progress_at = Some(now);
        self.has_shown_progress = true;
    }

    /// Recovery marker observed; from here on only markers count
    pub fn record_recovery(&mut self, now: Instant) {
        self.marker_seen = true;
        self.actual_conversions += 1;
        self.last_progress_at = Some(now);
        self.has_shown_progress = true;
    }

    /// Clean exit 0: the whole assignment is done regardless of what the
    /// last progress line said
    pub fn mark_complete(&mut self) {
        self.status = WorkerStatus::Complete;
        // Units the progress stream never reported still count toward the
        // marker-less fallback
        if !self.marker_seen {
            self.actual_conversions += self.assigned_units() - self.completed_units;
        }
        self.completed_units = self.assigned_units();
        self.current_unit = self.completed_units;
        self.pid = None;
        self.last_error = None;
    }

    /// Terminal failure of the current attempt
    pub fn mark_failed(&mut self, error: WorkerError) {
        self.status = WorkerStatus::Error;
        self.pid = None;
        self.last_error = Some(error);
    }

    /// Whether another attempt is allowed
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.status == WorkerStatus::Error
            && self.retry_count < max_retries
            && self
                .last_error
                .as_ref()
                .is_some_and(|e| e.is_retryable())
    }

    /// Consume one retry; the caller spawns the next attempt
    pub fn prepare_retry(&mut self) {
        self.retry_count += 1;
        self.status = WorkerStatus::Pending;
        self.pending_stall = None;
    }

    /// Complete or permanently failed
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        match self.status {
            WorkerStatus::Complete => true,
            WorkerStatus::Error => !self.can_retry(max_retries),
            WorkerStatus::Pending | WorkerStatus::Running => false,
        }
    }

    /// Serializable view without the live process fields
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            status: self.status,
            completed_units: self.completed_units,
            assigned_units: self.assigned_units(),
            retry_count: self.retry_count,
            assignment: self.assignment.describe(),
        }
    }
}

/// Serializable view of one worker for progress snapshots
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub status: WorkerStatus,
    pub completed_units: u64,
    pub assigned_units: u64,
    pub retry_count: u32,
    pub assignment: String,
}

/// Spawn one attempt of a worker as a detached task
///
/// The task owns the child process, streams both output pipes through the
/// parser, and reports everything on `events`. The final event for an
/// attempt is always `Exited` or `SpawnFailed`.
pub fn spawn_attempt(
    mut cmd: Command,
    worker_id: usize,
    parser: Arc<dyn ProgressParser>,
    events: mpsc::Sender<WorkerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = events
                    .send(WorkerEvent::SpawnFailed {
                        worker: worker_id,
                        error: WorkerError::SpawnFailed {
                            id: worker_id,
                            reason: e.to_string(),
                        },
                    })
                    .await;
                return;
            }
        };

        if let Some(pid) = child.id() {
            debug!(worker = worker_id, pid = pid, "Worker process started");
            let _ = events
                .send(WorkerEvent::Started {
                    worker: worker_id,
                    pid,
                })
                .await;
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stream_lines(stdout, worker_id, Arc::clone(&parser), events.clone());
        let err_task = stream_lines(stderr, worker_id, Arc::clone(&parser), events.clone());

        let status = child.wait().await;

        // Drain before reporting the exit so no progress event can arrive
        // after Exited
        out_task.await.ok();
        err_task.await.ok();

        let result = match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => match status.code() {
                Some(code) => Err(WorkerError::ExitedNonZero {
                    id: worker_id,
                    code,
                }),
                None => Err(WorkerError::KilledBySignal { id: worker_id }),
            },
            Err(e) => Err(WorkerError::SpawnFailed {
                id: worker_id,
                reason: e.to_string(),
            }),
        };

        let _ = events
            .send(WorkerEvent::Exited {
                worker: worker_id,
                result,
            })
            .await;
    })
}

fn stream_lines<R>(
    reader: Option<R>,
    worker_id: usize,
    parser: Arc<dyn ProgressParser>,
    events: mpsc::Sender<WorkerEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            match parser.parse(&line) {
                EngineLine::Progress { current, total } => {
                    let _ = events
                        .send(WorkerEvent::Progress {
                            worker: worker_id,
                            current,
                            total,
                        })
                        .await;
                }
                EngineLine::Recovered { unit } => {
                    let _ = events
                        .send(WorkerEvent::Recovered {
                            worker: worker_id,
                            unit,
                        })
                        .await;
                }
                _ => trace!(worker = worker_id, line = %line, "Engine output"),
            }
        }
    })
}
