//! Configuration types for tts-conductor
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Tuning knobs for the watchdog and the blended ETA

use crate::error::ConfigError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum reasonable worker count (each worker is a full engine process)
const MAX_WORKERS: usize = 64;

/// Maximum retry limit per worker
const MAX_RETRY_LIMIT: u32 = 10;

/// Default retry budget before a worker is classified permanently failed
pub const DEFAULT_WORKER_RETRIES: u32 = 2;

/// Convert documents to audiobooks with a pool of speech-engine processes
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tts-conductor",
    version,
    about = "Convert documents to audiobooks with a pool of speech-engine processes",
    long_about = "Coordinates parallel speech-engine worker processes over a partitioned \
                  document, watches them for stalls, retries failures, and assembles the \
                  per-sentence outputs into one audiobook file.\n\n\
                  Interrupted runs can be resumed from on-disk evidence alone: the \
                  coordinator inspects which sentence outputs already exist and only \
                  re-synthesizes the missing ones.",
    after_help = "EXAMPLES:\n    \
        tts-conductor convert book.epub -w 4 --voice aria\n    \
        tts-conductor convert book.epub --by-chapters --title \"My Book\" --author \"Jane Doe\"\n    \
        tts-conductor status book.epub\n    \
        tts-conductor resume book.epub -w 8"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Convert a document from scratch
    Convert(ConvertArgs),

    /// Resume a previously interrupted conversion
    Resume(ConvertArgs),

    /// Show how much of a prior conversion is already on disk
    Status {
        /// Document whose sessions to inspect
        #[arg(value_name = "DOCUMENT")]
        document: PathBuf,

        /// Directory holding engine session state
        #[arg(long, default_value = "tts-sessions", value_name = "DIR")]
        sessions_root: PathBuf,

        /// Inspect this session id instead of matching by source path
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },
}

/// Arguments shared by `convert` and `resume`
#[derive(clap::Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Document to convert (epub, pdf, txt - whatever the engine accepts)
    #[arg(value_name = "DOCUMENT")]
    pub document: PathBuf,

    /// Output directory for the assembled audiobook
    #[arg(short = 'o', long, default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Rename the assembled file to this name (extension added if missing)
    #[arg(long, value_name = "NAME")]
    pub output_name: Option<String>,

    /// Number of engine worker processes
    #[arg(short = 'w', long, default_value_t = default_workers(), value_name = "NUM")]
    pub workers: usize,

    /// Partition by chapters instead of individual sentences
    #[arg(long)]
    pub by_chapters: bool,

    /// Speech engine binary
    #[arg(long, default_value = "tts-engine", value_name = "PATH")]
    pub engine: PathBuf,

    /// Directory holding engine session state
    #[arg(long, default_value = "tts-sessions", value_name = "DIR")]
    pub sessions_root: PathBuf,

    /// Voice preset to synthesize with (engine default when omitted)
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Language code passed to the engine
    #[arg(long, default_value = "en", value_name = "LANG")]
    pub language: String,

    /// Compute device for the engine
    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,

    /// Speech speed multiplier
    #[arg(long, default_value = "1.0", value_name = "FACTOR")]
    pub speed: f32,

    /// Sampling temperature
    #[arg(long, default_value = "0.75", value_name = "T")]
    pub temperature: f32,

    /// Nucleus sampling threshold
    #[arg(long, default_value = "0.85", value_name = "P")]
    pub top_p: f32,

    /// Repetition penalty
    #[arg(long, default_value = "3.0", value_name = "R")]
    pub repetition_penalty: f32,

    /// Retries per worker before it is classified permanently failed
    #[arg(long, default_value_t = DEFAULT_WORKER_RETRIES, value_name = "NUM")]
    pub retries: u32,

    /// Seconds a worker may run without any progress before being killed
    #[arg(long, default_value = "600", value_name = "SECS")]
    pub startup_timeout: u64,

    /// Seconds of progress silence after which a running worker is killed
    #[arg(long, default_value = "300", value_name = "SECS")]
    pub progress_timeout: u64,

    /// Audiobook title written by the tagging step
    #[arg(long, value_name = "TITLE")]
    pub title: Option<String>,

    /// Audiobook author written by the tagging step
    #[arg(long, value_name = "AUTHOR")]
    pub author: Option<String>,

    /// Release year written by the tagging step
    #[arg(long, value_name = "YEAR")]
    pub year: Option<u32>,

    /// Cover image embedded by the tagging step
    #[arg(long, value_name = "FILE")]
    pub cover: Option<PathBuf>,

    /// Metadata tagging binary (tagging is skipped when unset)
    #[arg(long, value_name = "PATH")]
    pub tagging_tool: Option<PathBuf>,

    /// Resume: pin an explicit session id instead of matching by source path
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,
}

/// Compute device the engine should synthesize on
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Let the engine pick (cuda > mps > cpu)
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    /// Flag value understood by the engine
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
            Device::Mps => "mps",
        }
    }
}

/// How the document is partitioned across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// One unit = one sentence
    Sentences,
    /// One unit = one chapter's sentence span
    Chapters,
}

/// Engine synthesis settings forwarded to every worker
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub voice: Option<String>,
    pub language: String,
    pub device: Device,
    pub speed: f32,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            voice: None,
            language: "en".into(),
            device: Device::Auto,
            speed: 1.0,
            temperature: 0.75,
            top_p: 0.85,
            repetition_penalty: 3.0,
        }
    }
}

/// Watchdog timing
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the liveness check runs
    pub poll_interval: Duration,

    /// Max time without any progress after start (model load allowance)
    pub startup_timeout: Duration,

    /// Max silence after progress has been shown
    pub progress_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(600),
            progress_timeout: Duration::from_secs(300),
        }
    }
}

/// Tuning for the blended ETA estimate
///
/// The long-horizon rate is stable but slow to react; the sliding-window
/// rate reacts to workers dying or joining. Both weights must sum to 1.
#[derive(Debug, Clone)]
pub struct EtaTuning {
    /// Sliding window length for the recent-rate estimate
    pub window: Duration,

    /// Weight of the long-horizon rate in the blend
    pub long_weight: f64,

    /// Weight of the recent-window rate in the blend
    pub recent_weight: f64,

    /// Window samples required before blending kicks in
    pub min_window_samples: usize,
}

impl Default for EtaTuning {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(120),
            long_weight: 0.7,
            recent_weight: 0.3,
            min_window_samples: 3,
        }
    }
}

/// Caller-supplied metadata applied to the assembled audiobook
#[derive(Debug, Clone, Default)]
pub struct OutputMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<u32>,
    pub cover: Option<PathBuf>,
}

impl OutputMetadata {
    /// True when there is nothing to tag
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.author.is_none() && self.year.is_none() && self.cover.is_none()
    }
}

/// Validated runtime configuration for one conversion
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Document being converted
    pub document: PathBuf,

    /// Speech engine binary
    pub engine: PathBuf,

    /// Root directory for engine session state
    pub sessions_root: PathBuf,

    /// Directory receiving the assembled audiobook
    pub output_dir: PathBuf,

    /// Optional rename target for the assembled file
    pub output_name: Option<String>,

    /// Extension of the assembled audiobook
    pub output_extension: String,

    /// Number of engine worker processes
    pub worker_count: usize,

    /// Sentence or chapter partitioning
    pub partition_mode: PartitionMode,

    /// Engine synthesis settings
    pub engine_settings: EngineSettings,

    /// Per-worker retry budget
    pub max_worker_retries: u32,

    /// Watchdog timing
    pub watchdog: WatchdogConfig,

    /// ETA blend tuning
    pub eta: EtaTuning,

    /// Metadata for the tagging step
    pub metadata: OutputMetadata,

    /// Tagging binary; None disables tagging entirely
    pub tagging_tool: Option<PathBuf>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl ConvertConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &ConvertArgs, verbose: bool, quiet: bool) -> Result<Self, ConfigError> {
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        if args.retries > MAX_RETRY_LIMIT {
            return Err(ConfigError::InvalidRetryLimit {
                count: args.retries,
                max: MAX_RETRY_LIMIT,
            });
        }

        if args.startup_timeout == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "startup",
                secs: args.startup_timeout,
            });
        }

        if args.progress_timeout == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "progress",
                secs: args.progress_timeout,
            });
        }

        if !args.document.exists() {
            return Err(ConfigError::DocumentNotFound {
                path: args.document.clone(),
            });
        }

        // Engine given as an explicit path must exist; a bare name is
        // resolved via PATH at spawn time.
        if args.engine.components().count() > 1 && !args.engine.exists() {
            return Err(ConfigError::EngineNotFound {
                path: args.engine.clone(),
            });
        }

        if !args.output_dir.exists() {
            return Err(ConfigError::InvalidOutputPath {
                path: args.output_dir.clone(),
                reason: "directory does not exist".into(),
            });
        }

        validate_setting("speed", args.speed, 0.5, 2.0)?;
        validate_setting("temperature", args.temperature, 0.05, 1.5)?;
        validate_setting("top_p", args.top_p, 0.0, 1.0)?;
        validate_setting("repetition_penalty", args.repetition_penalty, 1.0, 10.0)?;

        let engine_settings = EngineSettings {
            voice: args.voice.clone(),
            language: args.language.clone(),
            device: args.device,
            speed: args.speed,
            temperature: args.temperature,
            top_p: args.top_p,
            repetition_penalty: args.repetition_penalty,
        };

        let watchdog = WatchdogConfig {
            startup_timeout: Duration::from_secs(args.startup_timeout),
            progress_timeout: Duration::from_secs(args.progress_timeout),
            ..WatchdogConfig::default()
        };

        let metadata = OutputMetadata {
            title: args.title.clone(),
            author: args.author.clone(),
            year: args.year,
            cover: args.cover.clone(),
        };

        let config = Self {
            document: args.document.clone(),
            engine: args.engine.clone(),
            sessions_root: args.sessions_root.clone(),
            output_dir: args.output_dir.clone(),
            output_name: args.output_name.clone(),
            output_extension: "m4b".into(),
            worker_count: args.workers,
            partition_mode: if args.by_chapters {
                PartitionMode::Chapters
            } else {
                PartitionMode::Sentences
            },
            engine_settings,
            max_worker_retries: args.retries,
            watchdog,
            eta: EtaTuning::default(),
            metadata,
            tagging_tool: args.tagging_tool.clone(),
            show_progress: !quiet,
            verbose,
        };

        config.validate_eta()?;
        Ok(config)
    }

    fn validate_eta(&self) -> Result<(), ConfigError> {
        let sum = self.eta.long_weight + self.eta.recent_weight;
        if self.eta.long_weight < 0.0 || self.eta.recent_weight < 0.0 {
            return Err(ConfigError::InvalidEtaTuning {
                reason: "blend weights must be non-negative".into(),
            });
        }
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidEtaTuning {
                reason: format!("blend weights sum to {sum}, expected 1.0"),
            });
        }
        Ok(())
    }
}

fn validate_setting(
    name: &'static str,
    value: f32,
    min: f32,
    max: f32,
) -> Result<(), ConfigError> {
    if value < min || value > max || !value.is_finite() {
        return Err(ConfigError::InvalidSetting {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn default_workers() -> usize {
    // Each worker holds a full model in memory, so half the cores is a
    // safer default than one-per-core.
    (num_cpus::get() / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args(document: PathBuf) -> ConvertArgs {
        ConvertArgs {
            document,
            output_dir: PathBuf::from("."),
            output_name: None,
            workers: 4,
            by_chapters: false,
            engine: PathBuf::from("tts-engine"),
            sessions_root: PathBuf::from("tts-sessions"),
            voice: None,
            language: "en".into(),
            device: Device::Auto,
            speed: 1.0,
            temperature: 0.75,
            top_p: 0.85,
            repetition_penalty: 3.0,
            retries: 2,
            startup_timeout: 600,
            progress_timeout: 300,
            title: None,
            author: None,
            year: None,
            cover: None,
            tagging_tool: None,
            session: None,
        }
    }

    fn temp_document() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("book.txt");
        std::fs::write(&doc, "hello").unwrap();
        (dir, doc)
    }

    #[test]
    fn test_valid_config() {
        let (_dir, doc) = temp_document();
        let config = ConvertConfig::from_args(&base_args(doc), false, false).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.partition_mode, PartitionMode::Sentences);
        assert!(config.show_progress);
    }

    #[test]
    fn test_invalid_worker_count() {
        let (_dir, doc) = temp_document();
        let mut args = base_args(doc);
        args.workers = 0;
        let err = ConvertConfig::from_args(&args, false, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerCount { .. }));
    }

    #[test]
    fn test_missing_document() {
        let mut args = base_args(PathBuf::from("/definitely/not/here.epub"));
        args.workers = 2;
        let err = ConvertConfig::from_args(&args, false, false).unwrap_err();
        assert!(matches!(err, ConfigError::DocumentNotFound { .. }));
    }

    #[test]
    fn test_setting_out_of_range() {
        let (_dir, doc) = temp_document();
        let mut args = base_args(doc);
        args.speed = 5.0;
        let err = ConvertConfig::from_args(&args, false, false).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { name: "speed", .. }
        ));
    }

    #[test]
    fn test_chapter_mode() {
        let (_dir, doc) = temp_document();
        let mut args = base_args(doc);
        args.by_chapters = true;
        let config = ConvertConfig::from_args(&args, false, true).unwrap();
        assert_eq!(config.partition_mode, PartitionMode::Chapters);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_eta_defaults_blend_to_one() {
        let eta = EtaTuning::default();
        assert!((eta.long_weight + eta.recent_weight - 1.0).abs() < 1e-9);
        assert_eq!(eta.min_window_samples, 3);
    }
}
