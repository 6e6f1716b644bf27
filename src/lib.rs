//! tts-conductor - Parallel Audiobook Conversion Coordinator
//!
//! A coordinator that turns a document into an audiobook by partitioning its
//! sentences across a pool of external speech-engine processes. The engine
//! does the synthesis; this crate does everything around it: partitioning,
//! supervision, retries, stall detection, progress aggregation, assembly,
//! and crash-safe resume.
//!
//! # Features
//!
//! - **Process Pool**: Each worker is a full engine OS process with its own
//!   sentence range, so one wedged model never blocks the rest.
//!
//! - **Supervision**: Failed workers are retried with the same assignment up
//!   to a configured budget; a watchdog kills workers that stop reporting
//!   progress and routes them through the same retry path.
//!
//! - **Live Progress**: Per-worker progress lines are folded into one
//!   snapshot stream with a blended ETA that reacts when workers die or
//!   rejoin.
//!
//! - **Resume**: Interrupted runs restart from on-disk evidence alone. The
//!   coordinator scans which sentence outputs already exist and only
//!   re-synthesizes the missing ones.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ConductorService                            │
//! │        job registry, cancellation, event subscriptions          │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ one session task per job
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       SessionRunner                             │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │Worker 0 │  │Worker 1 │  │Worker 2 │  ...    │Worker N │     │
//! │  │ engine  │  │ engine  │  │ engine  │         │ engine  │     │
//! │  │ process │  │ process │  │ process │         │ process │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       │            │            │                    │          │
//! │       └────────────┴─────┬──────┴────────────────────┘          │
//! │                          │ WorkerEvent channel                  │
//! │                          ▼                                      │
//! │            ┌──────────────────────────┐                         │
//! │            │      Session Loop        │                         │
//! │            │  - watchdog + retries    │                         │
//! │            │  - progress aggregation  │                         │
//! │            └────────────┬─────────────┘                         │
//! │                         │                                       │
//! │                         ▼                                       │
//! │            ┌──────────────────────────┐                         │
//! │            │   Assembly + Tagging     │                         │
//! │            │  - engine assemble mode  │                         │
//! │            │  - metadata, rename      │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────┐
//!                    │    audiobook     │
//!                    │    (book.m4b)    │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Basic conversion with four workers
//! tts-conductor convert book.epub -w 4 --voice aria
//!
//! # Chapter-wise partitioning with metadata tagging
//! tts-conductor convert book.epub --by-chapters --title "My Book" \
//!     --author "Jane Doe" --tagging-tool m4btag
//!
//! # See what an interrupted run left behind, then pick it up
//! tts-conductor status book.epub
//! tts-conductor resume book.epub -w 8
//! ```

pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod joblog;
pub mod progress;
pub mod tagging;

pub use config::{CliArgs, Command, ConvertConfig, EngineSettings, EtaTuning, WatchdogConfig};
pub use convert::{
    AggregatedProgress, ConductorService, ConversionEvent, ConversionOutcome, PrepInfo,
    ResumeCheckResult,
};
pub use error::{ConductorError, Result};
pub use joblog::{JobLog, JobLogHandle};
