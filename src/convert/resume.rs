//! Resume from on-disk evidence
//!
//! An interrupted run leaves a session directory full of per-sentence
//! output files behind. Resuming never asks the engine what happened; it
//! lists those files against the total recorded in the state file, and the
//! complement is what still needs synthesizing.

use crate::convert::partition;
use crate::engine::session::{scan_sessions, SessionDir, SessionState};
use crate::error::{SessionError, SessionResult};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

/// Everything needed to report on and restart a prior session
#[derive(Debug, Clone)]
pub struct ResumeCheckResult {
    pub session_id: String,
    pub dir: SessionDir,
    pub state: SessionState,
    pub total_units: usize,
    pub completed_units: usize,

    /// Missing unit indices, sorted ascending
    pub missing: Vec<usize>,

    /// Missing indices compressed to inclusive ranges, for reporting only
    pub missing_ranges: Vec<(usize, usize)>,
}

impl ResumeCheckResult {
    /// Nothing left to synthesize; assembly can run immediately
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Locate the session for `document` and measure completed work on disk
///
/// With an explicit session id only that directory is considered.
/// Otherwise every session whose recorded source matches the document is a
/// candidate and the most recently prepared one wins.
pub fn check_resume(
    sessions_root: &Path,
    document: &Path,
    session_id: Option<&str>,
) -> SessionResult<ResumeCheckResult> {
    let (dir, state) = match session_id {
        Some(id) => {
            let dir = SessionDir::new(sessions_root, id);
            if !dir.path().is_dir() {
                return Err(SessionError::SessionNotFound {
                    session_id: id.to_string(),
                    root: sessions_root.to_path_buf(),
                });
            }
            let state = dir.load_state().map_err(|e| SessionError::StateUnreadable {
                path: dir.state_file(),
                reason: e.to_string(),
            })?;
            (dir, state)
        }
        None => find_matching_session(sessions_root, document)?,
    };

    let completed = dir
        .completed_indices(state.total_units)
        .map_err(|e| SessionError::StateUnreadable {
            path: dir.sentences_dir(),
            reason: e.to_string(),
        })?;

    let missing: Vec<usize> = (0..state.total_units)
        .filter(|i| !completed.contains(i))
        .collect();
    let missing_ranges = partition::compress_ranges(&missing);

    info!(
        session = %state.session_id,
        total = state.total_units,
        completed = completed.len(),
        missing = missing.len(),
        "Resume check"
    );

    Ok(ResumeCheckResult {
        session_id: state.session_id.clone(),
        total_units: state.total_units,
        completed_units: completed.len(),
        missing,
        missing_ranges,
        dir,
        state,
    })
}

fn find_matching_session(
    sessions_root: &Path,
    document: &Path,
) -> SessionResult<(SessionDir, SessionState)> {
    let canonical = document.canonicalize().ok();
    let mut best: Option<(SystemTime, SessionDir, SessionState)> = None;

    for (dir, state) in scan_sessions(sessions_root) {
        if !source_matches(&state.source_path, document, canonical.as_deref()) {
            debug!(session = %state.session_id, source = %state.source_path.display(),
                "Session does not match document");
            continue;
        }
        let mtime = dir.state_mtime().unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().map_or(true, |(t, _, _)| mtime > *t) {
            best = Some((mtime, dir, state));
        }
    }

    best.map(|(_, dir, state)| (dir, state))
        .ok_or_else(|| SessionError::NoMatchingSession {
            document: document.to_path_buf(),
        })
}

/// Match the recorded source against the document being resumed
///
/// Exact path first, then canonicalized forms, then the bare file name as
/// a last resort so relative and absolute invocations find each other.
fn source_matches(recorded: &Path, document: &Path, canonical: Option<&Path>) -> bool {
    if recorded == document {
        return true;
    }
    if let Some(canonical) = canonical {
        if recorded == canonical {
            return true;
        }
        if recorded.canonicalize().map_or(false, |r| r == canonical) {
            return true;
        }
    }
    match (recorded.file_name(), document.file_name()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;

    fn make_session(
        root: &Path,
        id: &str,
        source: &str,
        total: usize,
        present: &[usize],
    ) -> SessionDir {
        let dir = SessionDir::new(root, id);
        fs::create_dir_all(dir.sentences_dir()).unwrap();

        let state = SessionState {
            session_id: id.to_string(),
            source_path: PathBuf::from(source),
            total_units: total,
            chapters: vec![crate::engine::session::ChapterBoundary {
                chapter: 0,
                unit_start: 0,
                unit_end: total - 1,
            }],
            title: None,
            author: None,
            language: "en".into(),
            created_at: Utc::now(),
        };
        fs::write(dir.state_file(), serde_json::to_string(&state).unwrap()).unwrap();

        for &i in present {
            fs::write(dir.sentence_file(i), b"audio").unwrap();
        }
        dir
    }

    #[test]
    fn test_missing_complement() {
        let tmp = tempfile::tempdir().unwrap();
        make_session(tmp.path(), "s1", "/books/a.epub", 20, &[0, 1, 3, 4, 8, 9]);

        let result = check_resume(tmp.path(), Path::new("/books/a.epub"), None).unwrap();
        assert_eq!(result.total_units, 20);
        assert_eq!(result.completed_units, 6);
        assert_eq!(result.missing[..3], [2, 5, 6]);
        assert_eq!(result.missing.len(), 14);
        assert_eq!(result.missing_ranges[0], (2, 2));
        assert_eq!(result.missing_ranges[1], (5, 7));
        assert!(!result.is_complete());
    }

    #[test]
    fn test_complete_session() {
        let tmp = tempfile::tempdir().unwrap();
        let all: Vec<usize> = (0..5).collect();
        make_session(tmp.path(), "s1", "/books/a.epub", 5, &all);

        let result = check_resume(tmp.path(), Path::new("/books/a.epub"), None).unwrap();
        assert!(result.is_complete());
        assert_eq!(result.completed_units, 5);
        assert!(result.missing_ranges.is_empty());
    }

    #[test]
    fn test_explicit_session_id() {
        let tmp = tempfile::tempdir().unwrap();
        make_session(tmp.path(), "first", "/books/a.epub", 5, &[0]);
        make_session(tmp.path(), "second", "/books/a.epub", 5, &[0, 1, 2]);

        let result =
            check_resume(tmp.path(), Path::new("/books/a.epub"), Some("first")).unwrap();
        assert_eq!(result.session_id, "first");
        assert_eq!(result.completed_units, 1);
    }

    #[test]
    fn test_explicit_session_id_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = check_resume(tmp.path(), Path::new("/books/a.epub"), Some("nope")).unwrap_err();
        assert!(matches!(err, SessionError::SessionNotFound { .. }));
    }

    #[test]
    fn test_newest_matching_session_wins() {
        let tmp = tempfile::tempdir().unwrap();
        make_session(tmp.path(), "older", "/books/a.epub", 5, &[0]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        make_session(tmp.path(), "newer", "/books/a.epub", 5, &[0, 1]);
        make_session(tmp.path(), "other-book", "/books/b.epub", 5, &[]);

        let result = check_resume(tmp.path(), Path::new("/books/a.epub"), None).unwrap();
        assert_eq!(result.session_id, "newer");
    }

    #[test]
    fn test_no_matching_session() {
        let tmp = tempfile::tempdir().unwrap();
        make_session(tmp.path(), "s1", "/books/a.epub", 5, &[]);

        let err = check_resume(tmp.path(), Path::new("/books/zzz.epub"), None).unwrap_err();
        assert!(matches!(err, SessionError::NoMatchingSession { .. }));
    }

    #[test]
    fn test_file_name_fallback_matching() {
        let tmp = tempfile::tempdir().unwrap();
        make_session(tmp.path(), "s1", "/somewhere/else/a.epub", 5, &[]);

        let result = check_resume(tmp.path(), Path::new("a.epub"), None).unwrap();
        assert_eq!(result.session_id, "s1");
    }
}
