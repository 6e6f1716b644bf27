//! Conversion pipeline: partitioning, supervision, aggregation, assembly
//!
//! This module turns one prepared engine session into an audiobook by
//! fanning the sentence range out over a pool of engine worker processes
//! and folding their output back into a single progress stream.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────────────────┐
//!                   │    ConductorService      │
//!                   │  job registry, cancel,   │
//!                   │  progress subscriptions  │
//!                   └────────────┬─────────────┘
//!                                │ one task per job
//!                   ┌────────────▼─────────────┐
//!                   │      SessionRunner       │
//!                   │  partition → supervise   │
//!                   │  → assemble → enhance    │
//!                   └────────────┬─────────────┘
//!              WorkerEvent mpsc  │   watchdog + sample ticks
//!       ┌────────────────────────┼────────────────────────┐
//!       │                        │                        │
//! ┌─────▼─────┐            ┌─────▼─────┐            ┌─────▼─────┐
//! │ Worker 0  │            │ Worker 1  │            │ Worker N  │
//! │ engine    │            │ engine    │            │ engine    │
//! │ process   │            │ process   │            │ process   │
//! └───────────┘            └───────────┘            └───────────┘
//! ```
//!
//! Worker state is owned exclusively by the session loop; attempt tasks
//! only own their child process and report what they see.

pub mod aggregate;
pub mod assembly;
pub mod events;
pub mod partition;
pub mod prepare;
pub mod resume;
pub mod service;
pub mod watchdog;
pub mod worker;

pub use aggregate::{AggregatedProgress, AssemblyProgress, ConvertPhase, ProgressTracker};
pub use events::{ConversionEvent, ConversionOutcome, RunAnalytics};
pub use prepare::PrepInfo;
pub use resume::{check_resume, ResumeCheckResult};
pub use service::ConductorService;
pub use worker::{WorkerSnapshot, WorkerStatus};
