//! Durable job log
//!
//! Append-only JSONL record of every notable state change a conversion goes
//! through. It runs in a dedicated thread and receives records via a channel,
//! so the coordinator never blocks on disk and a crash leaves a readable
//! trail up to the last flushed line.
//!
//! This is deliberately separate from the live event stream: subscribers can
//! come and go, the log file stays.

use crate::convert::aggregate::ConvertPhase;
use crate::engine::AssemblyPhase;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// One logged state change
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Wall-clock timestamp of the change
    pub at: DateTime<Utc>,

    /// Caller-assigned job id
    pub job: String,

    /// Engine session id, once one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    #[serde(flatten)]
    pub event: LogEvent,
}

impl LogRecord {
    pub fn new(job: &str, session: Option<&str>, event: LogEvent) -> Self {
        Self {
            at: Utc::now(),
            job: job.to_string(),
            session: session.map(str::to_string),
            event,
        }
    }
}

/// What happened
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    /// Engine preparation finished and reported the workload
    SessionPrepared { total_units: usize, chapters: usize },

    /// The conversion moved to a new phase
    PhaseChanged { phase: ConvertPhase },

    /// A worker process came up (attempt 0 is the first try)
    WorkerStarted { worker: usize, pid: u32, attempt: u32 },

    /// The watchdog killed a silent worker
    WorkerStalled { worker: usize, kind: String },

    /// A worker attempt failed
    WorkerFailed {
        worker: usize,
        error: String,
        will_retry: bool,
    },

    /// A worker finished its whole assignment
    WorkerCompleted { worker: usize, units: u64 },

    /// The assembly step entered a new sub-phase
    AssemblyPhase { phase: AssemblyPhase },

    /// The conversion produced its final output
    Completed {
        output: PathBuf,
        elapsed_secs: f64,
        sentences: u64,
    },

    /// The conversion failed
    Failed { error: String },

    /// The caller cancelled the conversion
    Cancelled,
}

/// Messages sent to the writer thread
#[derive(Debug)]
enum LogMessage {
    Record(LogRecord),
    Shutdown,
}

/// Counters maintained by the writer thread
#[derive(Debug, Default)]
pub struct LogStats {
    records_written: AtomicU64,
}

impl LogStats {
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }
}

/// Handle for appending records from anywhere
///
/// Appends never fail: the log is an ambient concern and must not be able to
/// take a conversion down with it. A closed writer is reported via `warn!`
/// and the record dropped.
#[derive(Clone)]
pub struct JobLogHandle {
    sender: Option<Sender<LogMessage>>,
    stats: Arc<LogStats>,
}

impl JobLogHandle {
    /// Handle that silently discards every record
    ///
    /// For embedding the service without a log file, and for tests.
    pub fn disabled() -> Self {
        Self {
            sender: None,
            stats: Arc::new(LogStats::default()),
        }
    }

    /// Append one record
    pub fn append(&self, record: LogRecord) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(LogMessage::Record(record)).is_err() {
            warn!("Job log writer is gone, dropping record");
        }
    }

    pub fn stats(&self) -> &LogStats {
        &self.stats
    }
}

/// JSONL log file with a dedicated writer thread
pub struct JobLog {
    /// Thread handle
    handle: Option<JoinHandle<std::io::Result<()>>>,

    /// Handle template cloned out to appenders
    log_handle: JobLogHandle,

    /// Path to the log file
    path: PathBuf,
}

impl JobLog {
    /// Open (or create) the log at `path` and spawn the writer thread
    ///
    /// The file is opened in append mode so successive runs accumulate.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let (sender, receiver) = bounded(1024);
        let stats = Arc::new(LogStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name("job-log".into())
            .spawn(move || writer_thread(file, receiver, stats_clone))
            .map_err(|e| {
                std::io::Error::other(format!("Failed to spawn job log thread: {e}"))
            })?;

        Ok(Self {
            handle: Some(handle),
            log_handle: JobLogHandle {
                sender: Some(sender),
                stats,
            },
            path: path.to_path_buf(),
        })
    }

    /// Get a handle for appending records
    pub fn handle(&self) -> JobLogHandle {
        self.log_handle.clone()
    }

    /// Flush remaining records and join the writer thread
    pub fn finish(mut self) -> std::io::Result<()> {
        if let Some(sender) = &self.log_handle.sender {
            let _ = sender.send(LogMessage::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(std::io::Error::other("Job log thread panicked")),
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Internal writer thread function
///
/// Every record is flushed as soon as it is written. Volume is a handful of
/// lines per conversion, and an up-to-date file is the whole point.
fn writer_thread(
    file: File,
    receiver: Receiver<LogMessage>,
    stats: Arc<LogStats>,
) -> std::io::Result<()> {
    let mut out = BufWriter::new(file);
    loop {
        match receiver.recv() {
            Ok(LogMessage::Record(record)) => match serde_json::to_string(&record) {
                Ok(line) => {
                    writeln!(out, "{line}")?;
                    out.flush()?;
                    stats.records_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("Dropping unserializable job log record: {e}"),
            },
            Ok(LogMessage::Shutdown) | Err(_) => break,
        }
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_log_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("joblog.jsonl");

        let log = JobLog::open(&path).unwrap();
        let handle = log.handle();

        handle.append(LogRecord::new(
            "job-1",
            None,
            LogEvent::PhaseChanged {
                phase: ConvertPhase::Preparing,
            },
        ));
        handle.append(LogRecord::new(
            "job-1",
            Some("sess-abc"),
            LogEvent::SessionPrepared {
                total_units: 42,
                chapters: 3,
            },
        ));
        handle.append(LogRecord::new(
            "job-1",
            Some("sess-abc"),
            LogEvent::WorkerStarted {
                worker: 0,
                pid: 1234,
                attempt: 0,
            },
        ));

        log.finish().unwrap();
        assert_eq!(handle.stats().records_written(), 3);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["job"], "job-1");
        assert_eq!(first["event"], "phase_changed");
        assert!(first.get("session").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["session"], "sess-abc");
        assert_eq!(second["total_units"], 42);
    }

    #[test]
    fn test_log_appends_across_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("joblog.jsonl");

        for run in 0..2 {
            let log = JobLog::open(&path).unwrap();
            log.handle().append(LogRecord::new(
                &format!("job-{run}"),
                None,
                LogEvent::Cancelled,
            ));
            log.finish().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_disabled_handle_discards() {
        let handle = JobLogHandle::disabled();
        handle.append(LogRecord::new("job-x", None, LogEvent::Cancelled));
        assert_eq!(handle.stats().records_written(), 0);
    }
}
