//! Error types for tts-conductor
//!
//! This module defines the error hierarchy for the conversion coordinator:
//! - Preparation errors (engine failed before any work was partitioned)
//! - Worker process errors (recoverable via bounded retry)
//! - Assembly and tagging errors (final muxing and post-processing)
//! - Session/resume errors (on-disk evidence inspection)
//! - Configuration and CLI errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - Per-worker failures are absorbed and retried; only session-level
//!   failures propagate to the caller

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the tts-conductor library
#[derive(Error, Debug)]
pub enum ConductorError {
    /// Preparation failed before any partitioning occurred (fatal, no partial work)
    #[error("Preparation error: {0}")]
    Prepare(#[from] PrepareError),

    /// A worker process failed
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// The assembly step failed with no recoverable output
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    /// Metadata tagging / rename failed (normally absorbed, surfaced only on request)
    #[error("Tagging error: {0}")]
    Tagging(#[from] TaggingError),

    /// Session lookup / resume evidence errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session registered under the given job id
    #[error("Unknown job id '{job_id}'")]
    UnknownJob { job_id: String },

    /// A job with this id is already registered
    #[error("Job '{job_id}' is already running")]
    JobAlreadyRunning { job_id: String },

    /// Every worker permanently failed; nothing to assemble
    #[error("All {count} workers permanently failed")]
    AllWorkersFailed { count: usize },

    /// The session was cancelled by the caller
    #[error("Conversion cancelled")]
    Cancelled,
}

/// Errors from the engine's preparation-only invocation
#[derive(Error, Debug)]
pub enum PrepareError {
    /// Could not start the engine process at all
    #[error("Failed to spawn engine '{engine}': {reason}")]
    SpawnFailed { engine: String, reason: String },

    /// Engine exited non-zero before producing a session
    #[error("Engine preparation exited with code {code}: {stderr}")]
    EngineFailed { code: i32, stderr: String },

    /// Engine exited cleanly but never wrote the session state file
    #[error("Session state file not found at '{path}' after preparation")]
    StateFileMissing { path: PathBuf },

    /// The state file exists but is not valid structured data
    #[error("Session state file '{path}' is invalid: {reason}")]
    StateFileInvalid { path: PathBuf, reason: String },

    /// I/O while reading the state file
    #[error("Failed to read session state: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-worker process errors
///
/// These are absorbed by the supervisor and retried up to the configured
/// limit before the worker is classified permanently failed.
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    /// Process could not be spawned (missing binary, resource limits)
    #[error("Worker {id} failed to spawn: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Process exited with a non-zero code
    #[error("Worker {id} exited with code {code}")]
    ExitedNonZero { id: usize, code: i32 },

    /// Process was terminated by a signal without an exit code
    #[error("Worker {id} terminated by signal")]
    KilledBySignal { id: usize },

    /// Watchdog killed the worker after detecting a stall
    #[error("Worker {id} stalled ({kind})")]
    Stalled { id: usize, kind: StallKind },

    /// Worker was killed because the session was cancelled
    #[error("Worker {id} cancelled")]
    Cancelled { id: usize },
}

impl WorkerError {
    /// Check if this error is retryable (cancellation never is)
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkerError::Cancelled { .. })
    }
}

/// Which watchdog timeout a stalled worker tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallKind {
    /// Never produced any progress (engine stuck loading its model)
    Startup,
    /// Produced progress, then went silent mid-run
    MidRun,
}

impl std::fmt::Display for StallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StallKind::Startup => write!(f, "no progress since start"),
            StallKind::MidRun => write!(f, "progress stopped mid-run"),
        }
    }
}

/// Errors from the final assembly step
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Could not start the assembly process
    #[error("Failed to spawn assembly: {reason}")]
    SpawnFailed { reason: String },

    /// Assembly tool exited non-zero and no output file could be recovered
    #[error("Assembly exited with code {code} and no output was found")]
    ToolFailed { code: i32 },

    /// Assembly claimed success but no output file exists
    #[error("No assembled output found in '{dir}'")]
    NoOutputProduced { dir: PathBuf },

    /// Assembly was interrupted by cancellation
    #[error("Assembly cancelled")]
    Cancelled,
}

/// Errors from the metadata/tagging tool (non-fatal: the untagged file is kept)
#[derive(Error, Debug)]
pub enum TaggingError {
    /// Tagging binary not found or not executable
    #[error("Tagging tool '{binary}' could not be run: {reason}")]
    ToolUnavailable { binary: String, reason: String },

    /// Tool ran but exited non-zero
    #[error("Tagging tool exited with code {code}: {stderr}")]
    ToolFailed { code: i32, stderr: String },
}

/// Errors inspecting prior sessions for resume
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session directory references this document
    #[error("No prior session found for '{document}'")]
    NoMatchingSession { document: PathBuf },

    /// Session directory exists but its state file cannot be read
    #[error("Session state at '{path}' is unreadable: {reason}")]
    StateUnreadable { path: PathBuf, reason: String },

    /// The session's per-unit output directory is missing
    #[error("Sentence output directory missing at '{path}'")]
    OutputDirMissing { path: PathBuf },

    /// The explicitly requested session id does not exist
    #[error("Session '{session_id}' not found under '{root}'")]
    SessionNotFound { session_id: String, root: PathBuf },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid retry limit
    #[error("Invalid retry limit {count}: must be at most {max}")]
    InvalidRetryLimit { count: u32, max: u32 },

    /// A timeout was set to zero or out of range
    #[error("Invalid {name} timeout: {secs}s")]
    InvalidTimeout { name: &'static str, secs: u64 },

    /// Engine binary missing or not a file
    #[error("Engine binary '{path}' not found")]
    EngineNotFound { path: PathBuf },

    /// Document to convert missing
    #[error("Document '{path}' not found")]
    DocumentNotFound { path: PathBuf },

    /// An engine synthesis setting is out of range
    #[error("Invalid {name} {value}: must be between {min} and {max}")]
    InvalidSetting {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    /// ETA tuning weights must be positive and sum to 1.0
    #[error("Invalid ETA tuning: {reason}")]
    InvalidEtaTuning { reason: String },

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },
}

/// Result type alias for ConductorError
pub type Result<T> = std::result::Result<T, ConductorError>;

/// Result type alias for PrepareError
pub type PrepareResult<T> = std::result::Result<T, PrepareError>;

/// Result type alias for WorkerError
pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Result type alias for AssemblyError
pub type AssemblyResult<T> = std::result::Result<T, AssemblyError>;

/// Result type alias for TaggingError
pub type TaggingResult<T> = std::result::Result<T, TaggingError>;

/// Result type alias for SessionError
pub type SessionResult<T> = std::result::Result<T, SessionError>;
