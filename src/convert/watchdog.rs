//! Stall detection over the worker pool
//!
//! The engine loads a large model before the first progress line appears,
//! so startup silence gets a generous allowance. Once a worker has shown
//! progress the allowance tightens; a worker that goes quiet mid-run is
//! almost always wedged on one sentence and will never recover on its own.

use crate::config::WatchdogConfig;
use crate::convert::worker::{WorkerState, WorkerStatus};
use crate::error::StallKind;
use std::time::Instant;

/// One worker the watchdog decided to kill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallAction {
    pub worker: usize,
    pub pid: u32,
    pub kind: StallKind,
}

/// Scan all workers for stalls
///
/// Marks each stalled worker's `pending_stall` and returns the kill list;
/// the caller terminates the process trees. The kill then surfaces as an
/// ordinary signal-death exit and flows through the normal retry path. A
/// worker already marked is not reported again while its process goes down.
pub fn check(
    workers: &mut [WorkerState],
    config: &WatchdogConfig,
    now: Instant,
) -> Vec<StallAction> {
    let mut actions = Vec::new();

    for worker in workers.iter_mut() {
        if worker.status != WorkerStatus::Running || worker.pending_stall.is_some() {
            continue;
        }
        let Some(pid) = worker.pid else { continue };
        let Some(started) = worker.started_at else { continue };

        let stall = if !worker.has_shown_progress {
            (now.duration_since(started) > config.startup_timeout).then_some(StallKind::Startup)
        } else {
            worker.last_progress_at.and_then(|last| {
                (now.duration_since(last) > config.progress_timeout).then_some(StallKind::MidRun)
            })
        };

        if let Some(kind) = stall {
            worker.pending_stall = Some(kind);
            actions.push(StallAction {
                worker: worker.id,
                pid,
                kind,
            });
        }
    }

    actions
}
