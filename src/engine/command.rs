//! Engine command-line construction
//!
//! Everything the coordinator knows about the engine's CLI surface lives in
//! this file. The engine has three modes:
//!
//! - `prepare`  - split the document, write the session state file, exit
//! - `synth`    - synthesize an assigned set of sentences into `sentences/`
//! - `assemble` - combine per-sentence audio into one audiobook file
//!
//! Keeping argument construction in one place means an engine flag rename
//! touches exactly one module.

use crate::config::{Device, EngineSettings};
use crate::engine::process;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Work handed to one engine worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkAssignment {
    /// Contiguous sentence indices, inclusive on both ends
    Sentences { start: usize, end: usize },

    /// Contiguous chapter indices, inclusive, with the sentence span they
    /// cover (progress is always accounted in sentences)
    Chapters {
        start: usize,
        end: usize,
        unit_start: usize,
        unit_end: usize,
    },

    /// Explicit scattered sentence indices, used on resume
    Explicit { indices: Vec<usize> },
}

impl WorkAssignment {
    /// Number of sentence outputs this assignment produces
    pub fn unit_count(&self) -> usize {
        match self {
            WorkAssignment::Sentences { start, end } => end - start + 1,
            WorkAssignment::Chapters {
                unit_start,
                unit_end,
                ..
            } => unit_end - unit_start + 1,
            WorkAssignment::Explicit { indices } => indices.len(),
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            WorkAssignment::Sentences { start, end } => format!("sentences {start}-{end}"),
            WorkAssignment::Chapters { start, end, .. } => format!("chapters {start}-{end}"),
            WorkAssignment::Explicit { indices } => {
                format!("{} scattered sentences", indices.len())
            }
        }
    }
}

/// Builds ready-to-spawn engine invocations
#[derive(Debug, Clone)]
pub struct EngineLauncher {
    engine: PathBuf,
    sessions_root: PathBuf,
    settings: EngineSettings,
}

impl EngineLauncher {
    pub fn new(engine: PathBuf, sessions_root: PathBuf, settings: EngineSettings) -> Self {
        Self {
            engine,
            sessions_root,
            settings,
        }
    }

    /// Binary this launcher invokes
    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// Prepare mode: split the document and persist the session state file
    pub fn prepare(&self, session_id: &str, source: &Path, by_chapters: bool) -> Command {
        let mut cmd = self.base("prepare", session_id);
        cmd.arg("--source").arg(source);
        if by_chapters {
            cmd.arg("--by-chapters");
        }
        self.apply_settings(&mut cmd);
        cmd
    }

    /// Worker mode: synthesize the assigned sentences
    pub fn synth(&self, session_id: &str, worker_id: usize, assignment: &WorkAssignment) -> Command {
        let mut cmd = self.base("synth", session_id);
        cmd.arg("--worker").arg(worker_id.to_string());

        match assignment {
            WorkAssignment::Sentences { start, end } => {
                cmd.arg("--sentence-range").arg(format!("{start}-{end}"));
            }
            WorkAssignment::Chapters { start, end, .. } => {
                cmd.arg("--chapter-range").arg(format!("{start}-{end}"));
            }
            WorkAssignment::Explicit { indices } => {
                let list = indices
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                cmd.arg("--sentences").arg(list);
            }
        }

        self.apply_settings(&mut cmd);
        cmd
    }

    /// Assembly mode: combine per-sentence audio into the audiobook
    pub fn assemble(&self, session_id: &str, output_dir: &Path) -> Command {
        let mut cmd = self.base("assemble", session_id);
        cmd.arg("--output-dir").arg(output_dir);
        cmd
    }

    fn base(&self, mode: &str, session_id: &str) -> Command {
        let mut cmd = Command::new(&self.engine);
        cmd.arg(mode)
            .arg("--session")
            .arg(session_id)
            .arg("--sessions-root")
            .arg(&self.sessions_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        process::own_process_group(&mut cmd);
        cmd
    }

    fn apply_settings(&self, cmd: &mut Command) {
        let s = &self.settings;
        cmd.arg("--language").arg(&s.language);
        if let Some(voice) = &s.voice {
            cmd.arg("--voice").arg(voice);
        }
        if s.device != Device::Auto {
            cmd.arg("--device").arg(s.device.as_str());
        }
        cmd.arg("--speed").arg(s.speed.to_string());
        cmd.arg("--temperature").arg(s.temperature.to_string());
        cmd.arg("--top-p").arg(s.top_p.to_string());
        cmd.arg("--repetition-penalty")
            .arg(s.repetition_penalty.to_string());
    }
}
