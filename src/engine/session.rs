//! On-disk engine session layout
//!
//! The engine keeps everything belonging to one conversion under a single
//! directory and communicates with the coordinator exclusively through it:
//!
//! ```text
//! tts-sessions/
//! └── 3f2a9c10-.../
//!     ├── session.json      <- written by prepare mode, read here
//!     ├── sentences/        <- one audio file per unit index
//!     │   ├── 00000.wav
//!     │   ├── 00001.wav
//!     │   └── ...
//!     └── proc-0/           <- engine scratch, one per attempt
//! ```
//!
//! Because workers only ever talk through this layout, a crashed run leaves
//! complete evidence of finished work behind, which is what makes resume
//! possible without asking the engine anything.

use crate::error::{PrepareError, PrepareResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// State file name inside a session directory
pub const STATE_FILE: &str = "session.json";

/// Per-unit output directory inside a session directory
pub const SENTENCES_DIR: &str = "sentences";

/// Extension of per-unit output files
pub const SENTENCE_EXT: &str = "wav";

/// One chapter's sentence span as recorded by the engine's prepare mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterBoundary {
    /// Zero-based chapter index
    pub chapter: usize,

    /// First sentence index of the chapter
    pub unit_start: usize,

    /// Last sentence index of the chapter (inclusive)
    pub unit_end: usize,
}

impl ChapterBoundary {
    /// Number of sentences in this chapter
    pub fn unit_count(&self) -> usize {
        self.unit_end - self.unit_start + 1
    }
}

/// Persisted session state written by the engine's prepare mode
///
/// This file is the handoff from preparation to everything else: total
/// counts and chapter boundaries come from here, never from prepare stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Session id (matches the directory name)
    pub session_id: String,

    /// Document this session was prepared from
    pub source_path: PathBuf,

    /// Total sentence count
    pub total_units: usize,

    /// Ordered chapter boundaries covering [0, total_units)
    pub chapters: Vec<ChapterBoundary>,

    /// Document title if the engine extracted one
    #[serde(default)]
    pub title: Option<String>,

    /// Document author if the engine extracted one
    #[serde(default)]
    pub author: Option<String>,

    /// Language the session was prepared for
    #[serde(default = "default_language")]
    pub language: String,

    /// When prepare ran
    pub created_at: DateTime<Utc>,
}

fn default_language() -> String {
    "en".into()
}

impl SessionState {
    /// Total chapter count
    pub fn total_chapters(&self) -> usize {
        self.chapters.len()
    }
}

/// Handle to one session directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDir {
    root: PathBuf,
}

impl SessionDir {
    /// Session directory for `session_id` under `sessions_root`
    pub fn new(sessions_root: &Path, session_id: &str) -> Self {
        Self {
            root: sessions_root.join(session_id),
        }
    }

    /// Wrap an already-resolved session directory path
    pub fn from_path(root: PathBuf) -> Self {
        Self { root }
    }

    /// The session directory itself
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of the persisted state file
    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Directory holding per-unit output files
    pub fn sentences_dir(&self) -> PathBuf {
        self.root.join(SENTENCES_DIR)
    }

    /// Output file for one unit index (`sentences/00042.wav`)
    pub fn sentence_file(&self, index: usize) -> PathBuf {
        self.sentences_dir()
            .join(format!("{index:05}.{SENTENCE_EXT}"))
    }

    /// Load and validate the persisted state file
    pub fn load_state(&self) -> PrepareResult<SessionState> {
        let path = self.state_file();
        if !path.exists() {
            return Err(PrepareError::StateFileMissing { path });
        }

        let raw = fs::read_to_string(&path)?;
        let state: SessionState =
            serde_json::from_str(&raw).map_err(|e| PrepareError::StateFileInvalid {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if state.total_units == 0 {
            return Err(PrepareError::StateFileInvalid {
                path,
                reason: "total_units is zero".into(),
            });
        }

        Ok(state)
    }

    /// Modification time of the state file, used to rank candidate sessions
    pub fn state_mtime(&self) -> Option<SystemTime> {
        fs::metadata(self.state_file()).and_then(|m| m.modified()).ok()
    }

    /// Unit indices with an output file on disk
    ///
    /// Scans `sentences/` once and collects every parseable index below
    /// `total_units`. Junk files and anything that is not `NNNNN.wav` are
    /// ignored rather than treated as errors.
    pub fn completed_indices(&self, total_units: usize) -> std::io::Result<HashSet<usize>> {
        let dir = self.sentences_dir();
        let mut completed = HashSet::new();

        if !dir.exists() {
            return Ok(completed);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if is_junk_file(name) {
                continue;
            }

            let Some(stem) = name.strip_suffix(&format!(".{SENTENCE_EXT}")) else {
                continue;
            };

            if let Ok(index) = stem.parse::<usize>() {
                if index < total_units {
                    completed.insert(index);
                }
            }
        }

        Ok(completed)
    }
}

/// Session directories under `sessions_root` that have a readable state file
///
/// Unreadable or foreign directories are skipped silently; callers only care
/// about sessions the coordinator could actually resume.
pub fn scan_sessions(sessions_root: &Path) -> Vec<(SessionDir, SessionState)> {
    let mut found = Vec::new();

    let Ok(entries) = fs::read_dir(sessions_root) else {
        return found;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let dir = SessionDir::from_path(path);
        if let Ok(state) = dir.load_state() {
            found.push((dir, state));
        }
    }

    found
}

/// Filter for platform litter that must never count as engine output
pub fn is_junk_file(name: &str) -> bool {
    name.starts_with('.') || name.eq_ignore_ascii_case("thumbs.db")
}
