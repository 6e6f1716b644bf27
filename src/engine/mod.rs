//! Speech-engine interface
//!
//! Everything specific to the external engine is isolated here: how it is
//! invoked, how its output stream is parsed, what it leaves on disk, and how
//! its process tree is torn down. The conversion pipeline above this module
//! never touches an engine detail directly.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                  EngineLauncher                    │
//! │  prepare / synth / assemble command construction   │
//! └──────────────────────┬─────────────────────────────┘
//!                        │ spawn (own process group)
//!                        ▼
//! ┌────────────────────────────────────────────────────┐
//! │              engine OS process (×N)                │
//! │  stdout/stderr ──> ProgressParser ──> EngineLine   │
//! │  sentences/NNNNN.wav ──> SessionDir scans          │
//! └────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod parse;
pub mod process;
pub mod session;

pub use command::{EngineLauncher, WorkAssignment};
pub use parse::{AssemblyPhase, EngineLine, ProgressParser, StockEngineParser};
pub use process::terminate_process_tree;
pub use session::{scan_sessions, ChapterBoundary, SessionDir, SessionState};
