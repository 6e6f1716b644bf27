//! Assembly stage
//!
//! Once conversion is over, the engine's assemble mode combines the
//! per-sentence audio into one audiobook file. The tool reports coarse
//! sub-phases rather than a single percentage; each sub-phase owns a band
//! of the overall assembly progress and progress lines inside a sub-phase
//! move within its band.

use crate::convert::aggregate::AssemblyProgress;
use crate::engine::parse::{AssemblyPhase, EngineLine, ProgressParser};
use crate::engine::session::is_junk_file;
use crate::error::AssemblyError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Event from the assembly task
#[derive(Debug)]
pub enum AssemblyEvent {
    Started { pid: u32 },
    Phase(AssemblyPhase),
    Progress { current: u64, total: u64 },
    Output(PathBuf),
    Finished(Result<(), AssemblyError>),
}

/// Maps sub-phase transitions and in-phase progress onto one percentage
#[derive(Debug, Clone, Copy)]
pub struct AssemblyTracker {
    phase: AssemblyPhase,
    within: f64,
}

impl AssemblyTracker {
    pub fn new() -> Self {
        Self {
            phase: AssemblyPhase::Combining,
            within: 0.0,
        }
    }

    /// Sub-phase transition; never moves backwards
    pub fn on_phase(&mut self, phase: AssemblyPhase) {
        if phase > self.phase {
            self.phase = phase;
            self.within = 0.0;
        }
    }

    /// Progress line inside the current sub-phase
    pub fn on_progress(&mut self, current: u64, total: u64) {
        if total > 0 {
            self.within = (current as f64 / total as f64).clamp(0.0, 1.0);
        }
    }

    /// Overall assembly percentage
    pub fn percent(&self) -> u8 {
        let (start, end) = self.phase.band();
        let span = (end - start) as f64;
        (start as f64 + self.within * span).round().min(end as f64) as u8
    }

    pub fn snapshot(&self) -> AssemblyProgress {
        AssemblyProgress {
            phase: self.phase,
            percent: self.percent(),
        }
    }
}

impl Default for AssemblyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the assembly process as a detached task
///
/// Streams its output through the parser and reports sub-phase markers,
/// progress, the echoed product path, and finally the exit. The last event
/// is always `Finished`.
pub fn spawn_assembly(
    mut cmd: Command,
    parser: Arc<dyn ProgressParser>,
    events: mpsc::Sender<AssemblyEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = events
                    .send(AssemblyEvent::Finished(Err(AssemblyError::SpawnFailed {
                        reason: e.to_string(),
                    })))
                    .await;
                return;
            }
        };

        if let Some(pid) = child.id() {
            debug!(pid = pid, "Assembly process started");
            let _ = events.send(AssemblyEvent::Started { pid }).await;
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stream_lines(stdout, Arc::clone(&parser), events.clone());
        let err_task = stream_lines(stderr, Arc::clone(&parser), events.clone());

        let status = child.wait().await;
        out_task.await.ok();
        err_task.await.ok();

        let result = match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(AssemblyError::ToolFailed {
                code: status.code().unwrap_or(-1),
            }),
            Err(e) => Err(AssemblyError::SpawnFailed {
                reason: e.to_string(),
            }),
        };
        let _ = events.send(AssemblyEvent::Finished(result)).await;
    })
}

fn stream_lines<R>(
    reader: Option<R>,
    parser: Arc<dyn ProgressParser>,
    events: mpsc::Sender<AssemblyEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(reader) = reader else { return };
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let event = match parser.parse(&line) {
                EngineLine::Phase(phase) => AssemblyEvent::Phase(phase),
                EngineLine::Progress { current, total } => {
                    AssemblyEvent::Progress { current, total }
                }
                EngineLine::OutputPath(path) => AssemblyEvent::Output(path),
                _ => {
                    trace!(line = %line, "Assembly output");
                    continue;
                }
            };
            let _ = events.send(event).await;
        }
    })
}

/// Newest plausible product in `dir` with the expected extension
///
/// Fallback for tools that never echo an output path. Junk files and
/// anything with the wrong extension are skipped.
pub fn find_newest_output(dir: &Path, extension: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_junk_file(name) {
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches_ext {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    newest.map(|(_, path)| path)
}

/// First free target path: `name.m4b`, `name (1).m4b`, `name (2).m4b`, ...
pub fn dedupe_target(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let plain = dir.join(format!("{stem}.{extension}"));
    if !plain.exists() {
        return plain;
    }
    for n in 1.. {
        let candidate = dir.join(format!("{stem} ({n}).{extension}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Rename the assembled file to the caller's chosen name
///
/// Also relocates a companion subtitle file written next to the product.
/// Failures are non-fatal; the assembled file is returned unrenamed.
pub fn relocate_output(raw: &Path, output_dir: &Path, name: &str, extension: &str) -> PathBuf {
    let stem = name
        .strip_suffix(&format!(".{extension}"))
        .unwrap_or(name);
    let target = dedupe_target(output_dir, stem, extension);

    if let Err(e) = std::fs::rename(raw, &target) {
        warn!(from = %raw.display(), to = %target.display(), error = %e, "Rename failed");
        return raw.to_path_buf();
    }

    let srt = raw.with_extension("srt");
    if srt.exists() {
        let srt_target = target.with_extension("srt");
        if let Err(e) = std::fs::rename(&srt, &srt_target) {
            warn!(from = %srt.display(), error = %e, "Subtitle relocation failed");
        }
    }

    target
}
