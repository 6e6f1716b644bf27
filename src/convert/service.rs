//! Conversion service and per-job session loop
//!
//! [`ConductorService`] is the caller-facing object: it registers jobs,
//! hands out progress and event subscriptions, and forwards cancellation.
//! Each started job runs as one detached [`SessionRunner`] task that owns
//! every worker, the watchdog, the progress tracker, and the assembly and
//! tagging steps for that conversion. Workers talk to the runner over one
//! bounded mpsc channel; the runner is the only writer of worker state.

use crate::config::{ConvertConfig, PartitionMode};
use crate::convert::aggregate::{
    AggregatedProgress, AssemblyProgress, ConvertPhase, ProgressTracker,
};
use crate::convert::assembly::{self, AssemblyEvent, AssemblyTracker};
use crate::convert::events::{ConversionEvent, ConversionOutcome, RunAnalytics, WorkerEvent};
use crate::convert::partition;
use crate::convert::prepare::{self, PrepInfo};
use crate::convert::resume::{self, ResumeCheckResult};
use crate::convert::watchdog;
use crate::convert::worker::{self, WorkerState, WorkerStatus};
use crate::engine::process::terminate_process_tree;
use crate::engine::{EngineLauncher, ProgressParser, StockEngineParser, WorkAssignment};
use crate::error::{AssemblyError, ConductorError, Result, WorkerError};
use crate::joblog::{JobLogHandle, LogEvent, LogRecord};
use crate::tagging::Tagger;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity of the per-session worker event channel and the subscriber
/// broadcast ring
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Minimum spacing between published progress snapshots
const EMIT_INTERVAL: Duration = Duration::from_millis(200);

/// How often a snapshot is taken even without worker events, so the ETA
/// window keeps moving during quiet stretches
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Caller-facing conversion service
///
/// Owns the registry of running jobs. Cloning is cheap; all clones share
/// the registry, which is how a Ctrl-C handler on another thread can stop
/// a job the main thread started.
#[derive(Clone)]
pub struct ConductorService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    jobs: RwLock<HashMap<String, JobEntry>>,
    joblog: JobLogHandle,
    parser: Arc<dyn ProgressParser>,
}

/// Registry entry for one running job
struct JobEntry {
    cancel: watch::Sender<bool>,
    events: broadcast::Sender<ConversionEvent>,
    latest: watch::Receiver<AggregatedProgress>,
}

impl ConductorService {
    pub fn new(joblog: JobLogHandle) -> Self {
        Self::with_parser(joblog, Arc::new(StockEngineParser))
    }

    /// Service with a custom engine output parser
    pub fn with_parser(joblog: JobLogHandle, parser: Arc<dyn ProgressParser>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                jobs: RwLock::new(HashMap::new()),
                joblog,
                parser,
            }),
        }
    }

    /// Run the engine's prepare step on its own and return the session info
    ///
    /// [`start_conversion`](Self::start_conversion) prepares internally;
    /// this entry point is for callers that want unit and chapter counts
    /// before committing to a run. The prepared session stays on disk, so
    /// a later resume picks it up.
    pub async fn prepare_session(&self, config: &ConvertConfig) -> Result<PrepInfo> {
        let launcher = EngineLauncher::new(
            config.engine.clone(),
            config.sessions_root.clone(),
            config.engine_settings.clone(),
        );
        let by_chapters = matches!(config.partition_mode, PartitionMode::Chapters);
        Ok(prepare::prepare_session(
            &launcher,
            &config.sessions_root,
            &config.document,
            by_chapters,
        )
        .await?)
    }

    /// Start a fresh conversion under `job_id`
    ///
    /// Must be called inside a tokio runtime. Returns as soon as the job is
    /// registered, handing back an event subscription that is guaranteed to
    /// see every event including the final [`ConversionEvent::Done`]. More
    /// subscribers can attach with [`subscribe`](Self::subscribe) while the
    /// job is running.
    pub fn start_conversion(
        &self,
        job_id: &str,
        config: ConvertConfig,
    ) -> Result<broadcast::Receiver<ConversionEvent>> {
        self.spawn_job(job_id, config, None)
    }

    /// Restart a partially-completed session from resume evidence
    ///
    /// `evidence` comes from [`check_resume_status`](Self::check_resume_status);
    /// only the sentences it lists as missing are synthesized. An already
    /// complete session goes straight to assembly.
    pub fn resume_conversion(
        &self,
        job_id: &str,
        config: ConvertConfig,
        evidence: ResumeCheckResult,
    ) -> Result<broadcast::Receiver<ConversionEvent>> {
        self.spawn_job(job_id, config, Some(evidence))
    }

    /// Request cooperative cancellation of a running job
    ///
    /// Returns once the request is delivered; the job winds down its worker
    /// processes asynchronously and finishes with a cancelled outcome.
    pub fn stop_conversion(&self, job_id: &str) -> Result<()> {
        let jobs = self.inner.jobs.read().unwrap_or_else(|e| e.into_inner());
        let entry = jobs.get(job_id).ok_or_else(|| ConductorError::UnknownJob {
            job_id: job_id.to_string(),
        })?;
        entry.cancel.send(true).ok();
        Ok(())
    }

    /// Latest progress snapshot of a running job
    pub fn get_progress(&self, job_id: &str) -> Result<AggregatedProgress> {
        let jobs = self.inner.jobs.read().unwrap_or_else(|e| e.into_inner());
        let entry = jobs.get(job_id).ok_or_else(|| ConductorError::UnknownJob {
            job_id: job_id.to_string(),
        })?;
        // The watch ref borrows through the registry guard and must drop first
        let latest = entry.latest.borrow().clone();
        Ok(latest)
    }

    /// Subscribe to the live event stream of a running job
    ///
    /// The stream ends with [`ConversionEvent::Done`]; slow subscribers may
    /// observe `Lagged` and should simply keep receiving.
    pub fn subscribe(&self, job_id: &str) -> Result<broadcast::Receiver<ConversionEvent>> {
        let jobs = self.inner.jobs.read().unwrap_or_else(|e| e.into_inner());
        let entry = jobs.get(job_id).ok_or_else(|| ConductorError::UnknownJob {
            job_id: job_id.to_string(),
        })?;
        Ok(entry.events.subscribe())
    }

    /// Inspect prior sessions for `document` without starting anything
    pub fn check_resume_status(
        &self,
        sessions_root: &Path,
        document: &Path,
        session_id: Option<&str>,
    ) -> Result<ResumeCheckResult> {
        Ok(resume::check_resume(sessions_root, document, session_id)?)
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        let jobs = self.inner.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.contains_key(job_id)
    }

    fn spawn_job(
        &self,
        job_id: &str,
        config: ConvertConfig,
        evidence: Option<ResumeCheckResult>,
    ) -> Result<broadcast::Receiver<ConversionEvent>> {
        let mut jobs = self.inner.jobs.write().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(job_id) {
            return Err(ConductorError::JobAlreadyRunning {
                job_id: job_id.to_string(),
            });
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (latest_tx, latest_rx) = watch::channel(AggregatedProgress::initial());

        jobs.insert(
            job_id.to_string(),
            JobEntry {
                cancel: cancel_tx,
                events: events_tx.clone(),
                latest: latest_rx,
            },
        );
        drop(jobs);

        let launcher = EngineLauncher::new(
            config.engine.clone(),
            config.sessions_root.clone(),
            config.engine_settings.clone(),
        );
        let runner = SessionRunner {
            job_id: job_id.to_string(),
            session_id: None,
            config,
            launcher,
            parser: Arc::clone(&self.inner.parser),
            evidence,
            events: events_tx,
            latest: latest_tx,
            cancel: cancel_rx,
            joblog: self.inner.joblog.clone(),
            phase: ConvertPhase::Preparing,
            workers: Vec::new(),
            tracker: None,
            assembly_progress: None,
            resumed: false,
            cancelled: false,
            last_emit: None,
        };

        let service = self.clone();
        let job = job_id.to_string();
        tokio::spawn(async move {
            runner.run().await;
            service.remove_job(&job);
        });
        Ok(events_rx)
    }

    fn remove_job(&self, job_id: &str) {
        let mut jobs = self.inner.jobs.write().unwrap_or_else(|e| e.into_inner());
        jobs.remove(job_id);
    }
}

/// Owns one conversion from preparation to the final outcome
struct SessionRunner {
    job_id: String,
    session_id: Option<String>,
    config: ConvertConfig,
    launcher: EngineLauncher,
    parser: Arc<dyn ProgressParser>,
    evidence: Option<ResumeCheckResult>,
    events: broadcast::Sender<ConversionEvent>,
    latest: watch::Sender<AggregatedProgress>,
    cancel: watch::Receiver<bool>,
    joblog: JobLogHandle,

    phase: ConvertPhase,
    workers: Vec<WorkerState>,
    tracker: Option<ProgressTracker>,
    assembly_progress: Option<AssemblyProgress>,
    resumed: bool,
    cancelled: bool,
    last_emit: Option<Instant>,
}

impl SessionRunner {
    async fn run(mut self) {
        info!(
            job = %self.job_id,
            document = %self.config.document.display(),
            "Conversion starting"
        );
        let started = Instant::now();
        self.emit_progress(true);

        let result = self.drive().await;
        let elapsed = started.elapsed().as_secs_f64();

        let session_units = self
            .tracker
            .as_ref()
            .map_or(0, |t| t.session_units(&self.workers));
        let failed_workers = self
            .workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Error)
            .count();
        let analytics = RunAnalytics::from_run(
            elapsed,
            session_units,
            self.workers.len(),
            failed_workers,
            self.resumed,
        );

        let outcome = match result {
            Ok(output) => {
                self.set_phase(ConvertPhase::Complete);
                self.log(LogEvent::Completed {
                    output: output.clone(),
                    elapsed_secs: elapsed,
                    sentences: session_units,
                });
                info!(
                    job = %self.job_id,
                    output = %output.display(),
                    sentences = session_units,
                    elapsed_secs = elapsed as u64,
                    "Conversion complete"
                );
                ConversionOutcome {
                    success: true,
                    output: Some(output),
                    error: None,
                    analytics,
                }
            }
            Err(e) => {
                self.set_phase(ConvertPhase::Error);
                if matches!(e, ConductorError::Cancelled) {
                    self.log(LogEvent::Cancelled);
                    info!(job = %self.job_id, "Conversion cancelled");
                } else {
                    self.log(LogEvent::Failed {
                        error: e.to_string(),
                    });
                    error!(job = %self.job_id, error = %e, "Conversion failed");
                }
                ConversionOutcome {
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    analytics,
                }
            }
        };

        self.emit_progress(true);
        let _ = self.events.send(ConversionEvent::Done(outcome));
    }

    async fn drive(&mut self) -> Result<PathBuf> {
        let (session_id, assignments) = self.resolve_workload().await?;

        self.workers = assignments
            .into_iter()
            .enumerate()
            .map(|(id, assignment)| WorkerState::new(id, assignment))
            .collect();

        if self.workers.is_empty() {
            info!(
                job = %self.job_id,
                "Nothing left to synthesize, going straight to assembly"
            );
        } else {
            self.set_phase(ConvertPhase::Converting);
            self.run_workers(&session_id).await;

            if self.cancelled {
                return Err(ConductorError::Cancelled);
            }

            let complete = self
                .workers
                .iter()
                .filter(|w| w.status == WorkerStatus::Complete)
                .count();
            let failed = self.workers.len() - complete;
            if complete == 0 {
                return Err(ConductorError::AllWorkersFailed { count: failed });
            }
            if failed > 0 {
                warn!(
                    job = %self.job_id,
                    failed,
                    complete,
                    "Assembling despite failed workers, the audiobook will have gaps"
                );
            }
        }

        self.set_phase(ConvertPhase::Assembling);
        let raw = self.run_assembly(&session_id).await?;

        Ok(self.post_process(raw).await)
    }

    /// Prepare a fresh session, or turn resume evidence into assignments
    async fn resolve_workload(&mut self) -> Result<(String, Vec<WorkAssignment>)> {
        match self.evidence.take() {
            Some(evidence) => {
                self.resumed = true;
                self.session_id = Some(evidence.session_id.clone());
                info!(
                    job = %self.job_id,
                    session = %evidence.session_id,
                    completed = evidence.completed_units,
                    missing = evidence.missing.len(),
                    "Resuming session from on-disk evidence"
                );
                self.tracker = Some(ProgressTracker::resumed(
                    evidence.total_units as u64,
                    evidence.completed_units as u64,
                    self.config.eta.clone(),
                ));
                let assignments =
                    partition::partition_missing(&evidence.missing, self.config.worker_count);
                Ok((evidence.session_id, assignments))
            }
            None => {
                let by_chapters = matches!(self.config.partition_mode, PartitionMode::Chapters);
                let prep = prepare::prepare_session(
                    &self.launcher,
                    &self.config.sessions_root,
                    &self.config.document,
                    by_chapters,
                )
                .await?;
                self.session_id = Some(prep.session_id.clone());
                self.log(LogEvent::SessionPrepared {
                    total_units: prep.total_units(),
                    chapters: prep.total_chapters(),
                });
                self.tracker = Some(ProgressTracker::fresh(
                    prep.total_units() as u64,
                    self.config.eta.clone(),
                ));
                let assignments = match self.config.partition_mode {
                    PartitionMode::Sentences => {
                        partition::partition_units(prep.total_units(), self.config.worker_count)
                    }
                    PartitionMode::Chapters => {
                        partition::partition_chapters(&prep.state.chapters, self.config.worker_count)
                    }
                };
                Ok((prep.session_id, assignments))
            }
        }
    }

    /// Drive the worker pool until every slot is complete or out of retries
    async fn run_workers(&mut self, session_id: &str) {
        let (worker_tx, mut worker_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        for id in 0..self.workers.len() {
            self.spawn_worker(session_id, id, &worker_tx);
        }

        let mut watchdog_tick = tokio::time::interval(self.config.watchdog.poll_interval);
        watchdog_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sample_tick = tokio::time::interval(SAMPLE_INTERVAL);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cancel = self.cancel.clone();

        loop {
            tokio::select! {
                Some(event) = worker_rx.recv() => {
                    self.on_worker_event(event, session_id, &worker_tx);
                    if self
                        .workers
                        .iter()
                        .all(|w| w.is_terminal(self.config.max_worker_retries))
                    {
                        break;
                    }
                    self.emit_progress(false);
                }
                _ = watchdog_tick.tick() => {
                    let actions =
                        watchdog::check(&mut self.workers, &self.config.watchdog, Instant::now());
                    for action in actions {
                        warn!(
                            job = %self.job_id,
                            worker = action.worker,
                            pid = action.pid,
                            kind = %action.kind,
                            "Worker stalled, killing its process tree"
                        );
                        self.log(LogEvent::WorkerStalled {
                            worker: action.worker,
                            kind: action.kind.to_string(),
                        });
                        terminate_process_tree(action.pid);
                    }
                }
                _ = sample_tick.tick() => {
                    self.emit_progress(false);
                }
                changed = cancel.changed(), if !self.cancelled => {
                    if changed.is_err() || *cancel.borrow() {
                        self.begin_cancel();
                    }
                }
            }
        }
    }

    fn on_worker_event(
        &mut self,
        event: WorkerEvent,
        session_id: &str,
        worker_tx: &mpsc::Sender<WorkerEvent>,
    ) {
        let now = Instant::now();
        match event {
            WorkerEvent::Started { worker, pid } => {
                let attempt = self.workers[worker].retry_count;
                self.workers[worker].mark_started(pid, now);
                info!(job = %self.job_id, worker, pid, attempt, "Worker running");
                self.log(LogEvent::WorkerStarted {
                    worker,
                    pid,
                    attempt,
                });
                // A spawn that raced the cancellation still has to die
                if self.cancelled {
                    terminate_process_tree(pid);
                }
            }
            WorkerEvent::Progress {
                worker, current, ..
            } => {
                self.workers[worker].record_progress(current, now);
            }
            WorkerEvent::Recovered { worker, .. } => {
                self.workers[worker].record_recovery(now);
            }
            WorkerEvent::Exited {
                worker,
                result: Ok(()),
            } => {
                // Exit 0 during cancellation means the work finished before
                // the kill landed; completion wins
                self.workers[worker].mark_complete();
                let units = self.workers[worker].completed_units;
                info!(job = %self.job_id, worker, units, "Worker finished its assignment");
                self.log(LogEvent::WorkerCompleted { worker, units });
            }
            WorkerEvent::Exited {
                worker,
                result: Err(error),
            }
            | WorkerEvent::SpawnFailed { worker, error } => {
                self.on_worker_failure(worker, error, session_id, worker_tx);
            }
        }
    }

    fn on_worker_failure(
        &mut self,
        worker: usize,
        error: WorkerError,
        session_id: &str,
        worker_tx: &mpsc::Sender<WorkerEvent>,
    ) {
        // Reattribute the raw exit: a kill we asked for is not a crash
        let error = if self.cancelled {
            WorkerError::Cancelled { id: worker }
        } else if let (Some(kind), WorkerError::KilledBySignal { .. }) =
            (self.workers[worker].pending_stall, &error)
        {
            WorkerError::Stalled { id: worker, kind }
        } else {
            error
        };

        self.workers[worker].mark_failed(error.clone());
        let will_retry = self.workers[worker].can_retry(self.config.max_worker_retries);
        if will_retry {
            warn!(
                job = %self.job_id,
                worker,
                error = %error,
                attempt = self.workers[worker].retry_count + 1,
                "Worker failed, retrying"
            );
        } else {
            error!(job = %self.job_id, worker, error = %error, "Worker failed permanently");
        }
        self.log(LogEvent::WorkerFailed {
            worker,
            error: error.to_string(),
            will_retry,
        });

        if will_retry {
            self.workers[worker].prepare_retry();
            self.spawn_worker(session_id, worker, worker_tx);
        }
    }

    fn spawn_worker(&self, session_id: &str, worker: usize, worker_tx: &mpsc::Sender<WorkerEvent>) {
        let assignment = &self.workers[worker].assignment;
        let cmd = self.launcher.synth(session_id, worker, assignment);
        debug!(
            job = %self.job_id,
            worker,
            assignment = %assignment.describe(),
            "Spawning worker attempt"
        );
        worker::spawn_attempt(cmd, worker, Arc::clone(&self.parser), worker_tx.clone());
    }

    fn begin_cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        info!(job = %self.job_id, "Cancellation requested, stopping workers");
        for w in &self.workers {
            if w.status == WorkerStatus::Running {
                if let Some(pid) = w.pid {
                    terminate_process_tree(pid);
                }
            }
        }
    }

    /// Run the engine's assemble mode and locate the produced audiobook
    async fn run_assembly(&mut self, session_id: &str) -> Result<PathBuf> {
        if self.cancelled {
            return Err(ConductorError::Cancelled);
        }

        let (assembly_tx, mut assembly_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cmd = self.launcher.assemble(session_id, &self.config.output_dir);
        assembly::spawn_assembly(cmd, Arc::clone(&self.parser), assembly_tx);

        let mut tracker = AssemblyTracker::new();
        let mut assembly_pid = None;
        let mut echoed: Option<PathBuf> = None;
        let mut cancel = self.cancel.clone();

        self.assembly_progress = Some(tracker.snapshot());
        self.emit_progress(true);

        let result = loop {
            tokio::select! {
                event = assembly_rx.recv() => match event {
                    Some(AssemblyEvent::Started { pid }) => {
                        debug!(job = %self.job_id, pid, "Assembly process started");
                        assembly_pid = Some(pid);
                        if self.cancelled {
                            terminate_process_tree(pid);
                        }
                    }
                    Some(AssemblyEvent::Phase(phase)) => {
                        tracker.on_phase(phase);
                        info!(job = %self.job_id, phase = phase.label(), "Assembly phase");
                        self.log(LogEvent::AssemblyPhase { phase });
                        self.assembly_progress = Some(tracker.snapshot());
                        self.emit_progress(true);
                    }
                    Some(AssemblyEvent::Progress { current, total }) => {
                        tracker.on_progress(current, total);
                        self.assembly_progress = Some(tracker.snapshot());
                        self.emit_progress(false);
                    }
                    Some(AssemblyEvent::Output(path)) => {
                        echoed = Some(path);
                    }
                    Some(AssemblyEvent::Finished(result)) => break result,
                    None => {
                        break Err(AssemblyError::SpawnFailed {
                            reason: "assembly event stream closed early".into(),
                        })
                    }
                },
                changed = cancel.changed(), if !self.cancelled => {
                    if changed.is_err() || *cancel.borrow() {
                        self.cancelled = true;
                        info!(job = %self.job_id, "Cancellation requested, stopping assembly");
                        if let Some(pid) = assembly_pid {
                            terminate_process_tree(pid);
                        }
                    }
                }
            }
        };

        if self.cancelled {
            return Err(ConductorError::Cancelled);
        }

        match result {
            Ok(()) => {}
            Err(AssemblyError::ToolFailed { code }) => {
                // Some muxers exit unhappily after the file is already
                // written; a present output trumps the exit code
                let recovered = echoed
                    .clone()
                    .filter(|p| p.is_file())
                    .or_else(|| {
                        assembly::find_newest_output(
                            &self.config.output_dir,
                            &self.config.output_extension,
                        )
                    });
                match recovered {
                    Some(found) => {
                        warn!(
                            job = %self.job_id,
                            code,
                            output = %found.display(),
                            "Assembly exited non-zero but an output exists, keeping it"
                        );
                        return Ok(found);
                    }
                    None => return Err(AssemblyError::ToolFailed { code }.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        let output = echoed
            .filter(|p| p.is_file())
            .or_else(|| {
                assembly::find_newest_output(&self.config.output_dir, &self.config.output_extension)
            })
            .ok_or(AssemblyError::NoOutputProduced {
                dir: self.config.output_dir.clone(),
            })?;
        info!(job = %self.job_id, output = %output.display(), "Assembly produced output");
        Ok(output)
    }

    /// Tagging and rename; never fails the conversion
    async fn post_process(&mut self, raw: PathBuf) -> PathBuf {
        let has_tagging = self.config.tagging_tool.is_some();
        let has_rename = self.config.output_name.is_some();
        if !has_tagging && !has_rename {
            return raw;
        }

        self.set_phase(ConvertPhase::Enhancing);

        if let Some(binary) = &self.config.tagging_tool {
            let tagger = Tagger::new(binary.clone());
            if let Err(e) = tagger.strip_cover(&raw).await {
                warn!(job = %self.job_id, error = %e, "Cover strip failed, keeping engine cover");
            }
            if let Err(e) = tagger.apply(&raw, &self.config.metadata).await {
                warn!(
                    job = %self.job_id,
                    error = %e,
                    "Tagging failed, output keeps engine metadata"
                );
            }
        }

        match &self.config.output_name {
            Some(name) => assembly::relocate_output(
                &raw,
                &self.config.output_dir,
                name,
                &self.config.output_extension,
            ),
            None => raw,
        }
    }

    fn set_phase(&mut self, next: ConvertPhase) {
        let before = self.phase;
        self.phase.advance(next);
        if self.phase != before {
            debug!(job = %self.job_id, phase = self.phase.label(), "Phase change");
            self.log(LogEvent::PhaseChanged { phase: self.phase });
            self.emit_progress(true);
        }
    }

    /// Publish a snapshot, throttled unless `force`
    fn emit_progress(&mut self, force: bool) {
        let now = Instant::now();
        if !force
            && self
                .last_emit
                .is_some_and(|at| now.duration_since(at) < EMIT_INTERVAL)
        {
            return;
        }
        self.last_emit = Some(now);

        let snap = match self.tracker.as_mut() {
            Some(tracker) => tracker.snapshot(self.phase, &self.workers, self.assembly_progress, now),
            None => {
                let mut snap = AggregatedProgress::initial();
                snap.phase = self.phase;
                if self.phase != ConvertPhase::Preparing {
                    snap.message = self.phase.label().to_string();
                }
                snap
            }
        };
        self.latest.send_replace(snap.clone());
        let _ = self.events.send(ConversionEvent::Progress(snap));
    }

    fn log(&self, event: LogEvent) {
        self.joblog
            .append(LogRecord::new(&self.job_id, self.session_id.as_deref(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineSettings, EtaTuning, OutputMetadata, WatchdogConfig};

    fn test_config() -> ConvertConfig {
        ConvertConfig {
            document: PathBuf::from("/tmp/book.epub"),
            engine: PathBuf::from("tts-engine"),
            sessions_root: PathBuf::from("/tmp/sessions"),
            output_dir: PathBuf::from("/tmp"),
            output_name: None,
            output_extension: "m4b".into(),
            worker_count: 2,
            partition_mode: PartitionMode::Sentences,
            engine_settings: EngineSettings::default(),
            max_worker_retries: 2,
            watchdog: WatchdogConfig::default(),
            eta: EtaTuning::default(),
            metadata: OutputMetadata::default(),
            tagging_tool: None,
            show_progress: false,
            verbose: false,
        }
    }

    #[test]
    fn test_unknown_job_queries() {
        let service = ConductorService::new(JobLogHandle::disabled());
        assert!(matches!(
            service.stop_conversion("nope"),
            Err(ConductorError::UnknownJob { .. })
        ));
        assert!(matches!(
            service.get_progress("nope"),
            Err(ConductorError::UnknownJob { .. })
        ));
        assert!(service.subscribe("nope").is_err());
        assert!(!service.is_running("nope"));
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let service = ConductorService::new(JobLogHandle::disabled());

        // Park an entry by hand; only the registration guard is under test
        {
            let mut jobs = service.inner.jobs.write().unwrap();
            let (cancel, _) = watch::channel(false);
            let (events, _) = broadcast::channel(8);
            let (_latest_tx, latest) = watch::channel(AggregatedProgress::initial());
            jobs.insert(
                "dup".into(),
                JobEntry {
                    cancel,
                    events,
                    latest,
                },
            );
        }

        assert!(service.is_running("dup"));
        let err = service.start_conversion("dup", test_config()).unwrap_err();
        assert!(matches!(err, ConductorError::JobAlreadyRunning { .. }));
    }

    #[test]
    fn test_progress_of_registered_job() {
        let service = ConductorService::new(JobLogHandle::disabled());
        {
            let mut jobs = service.inner.jobs.write().unwrap();
            let (cancel, _) = watch::channel(false);
            let (events, _) = broadcast::channel(8);
            let (_latest_tx, latest) = watch::channel(AggregatedProgress::initial());
            jobs.insert(
                "job".into(),
                JobEntry {
                    cancel,
                    events,
                    latest,
                },
            );
        }

        let progress = service.get_progress("job").unwrap();
        assert_eq!(progress.phase, ConvertPhase::Preparing);
        assert!(service.stop_conversion("job").is_ok());
    }
}
