//! Session preparation
//!
//! Runs the engine's prepare mode once per fresh job. Prepare splits the
//! document, writes the session state file, and exits; its stdout is
//! logging only. Counts and chapter boundaries come exclusively from the
//! persisted state file.

use crate::engine::session::{SessionDir, SessionState};
use crate::engine::EngineLauncher;
use crate::error::{PrepareError, PrepareResult};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Immutable result of preparing one session
#[derive(Debug, Clone)]
pub struct PrepInfo {
    pub session_id: String,
    pub dir: SessionDir,
    pub state: SessionState,
}

impl PrepInfo {
    pub fn total_units(&self) -> usize {
        self.state.total_units
    }

    pub fn total_chapters(&self) -> usize {
        self.state.total_chapters()
    }
}

/// Run prepare mode with a fresh session id and load the resulting state
///
/// Always re-run for a fresh job, never reused across resumes; besides the
/// split it also re-validates the engine settings against the installed
/// engine build.
pub async fn prepare_session(
    launcher: &EngineLauncher,
    sessions_root: &Path,
    source: &Path,
    by_chapters: bool,
) -> PrepareResult<PrepInfo> {
    let session_id = Uuid::new_v4().to_string();
    info!(session = %session_id, source = %source.display(), "Preparing session");

    let output = launcher
        .prepare(&session_id, source, by_chapters)
        .output()
        .await
        .map_err(|e| PrepareError::SpawnFailed {
            engine: launcher.engine().display().to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PrepareError::EngineFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: tail(&stderr, 2000).to_string(),
        });
    }

    let dir = SessionDir::new(sessions_root, &session_id);
    let state = dir.load_state()?;
    debug!(
        session = %session_id,
        units = state.total_units,
        chapters = state.total_chapters(),
        "Session prepared"
    );

    Ok(PrepInfo {
        session_id,
        dir,
        state,
    })
}

/// Reconstruct prep info from an existing session directory
pub fn reload_session(sessions_root: &Path, session_id: &str) -> PrepareResult<PrepInfo> {
    let dir = SessionDir::new(sessions_root, session_id);
    let state = dir.load_state()?;
    Ok(PrepInfo {
        session_id: session_id.to_string(),
        dir,
        state,
    })
}

/// Last `max` bytes of `s`, aligned to a char boundary
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_short_string() {
        assert_eq!(tail("hello", 100), "hello");
        assert_eq!(tail("hello", 3), "llo");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let s = "ab\u{00e9}cd";
        let t = tail(s, 4);
        assert!(s.ends_with(t));
        assert!(t.len() <= 4);
    }

    #[cfg(unix)]
    mod engine_tests {
        use super::*;
        use crate::config::EngineSettings;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        fn fake_engine(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-engine");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        const WRITES_STATE: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --session) SID="$2"; shift ;;
    --sessions-root) ROOT="$2"; shift ;;
  esac
  shift
done
mkdir -p "$ROOT/$SID"
cat > "$ROOT/$SID/session.json" <<EOF
{"session_id":"$SID","source_path":"/books/x.epub","total_units":10,
 "chapters":[{"chapter":0,"unit_start":0,"unit_end":9}],
 "created_at":"2026-08-25T00:00:00Z"}
EOF
"#;

        #[tokio::test]
        async fn test_prepare_loads_state_file() {
            let tmp = tempfile::tempdir().unwrap();
            let engine = fake_engine(tmp.path(), WRITES_STATE);
            let root = tmp.path().join("sessions");
            let launcher =
                EngineLauncher::new(engine, root.clone(), EngineSettings::default());

            let info = prepare_session(&launcher, &root, Path::new("/books/x.epub"), false)
                .await
                .unwrap();
            assert_eq!(info.total_units(), 10);
            assert_eq!(info.total_chapters(), 1);
            assert!(info.dir.state_file().exists());
        }

        #[tokio::test]
        async fn test_prepare_engine_failure_carries_stderr() {
            let tmp = tempfile::tempdir().unwrap();
            let engine = fake_engine(tmp.path(), "echo 'unsupported voice' >&2; exit 4");
            let root = tmp.path().join("sessions");
            let launcher =
                EngineLauncher::new(engine, root.clone(), EngineSettings::default());

            let err = prepare_session(&launcher, &root, Path::new("/books/x.epub"), false)
                .await
                .unwrap_err();
            match err {
                PrepareError::EngineFailed { code, stderr } => {
                    assert_eq!(code, 4);
                    assert!(stderr.contains("unsupported voice"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_prepare_missing_state_file() {
            let tmp = tempfile::tempdir().unwrap();
            let engine = fake_engine(tmp.path(), "exit 0");
            let root = tmp.path().join("sessions");
            fs::create_dir_all(&root).unwrap();
            let launcher =
                EngineLauncher::new(engine, root.clone(), EngineSettings::default());

            let err = prepare_session(&launcher, &root, Path::new("/books/x.epub"), false)
                .await
                .unwrap_err();
            assert!(matches!(err, PrepareError::StateFileMissing { .. }));
        }

        #[tokio::test]
        async fn test_prepare_spawn_failure() {
            let root = PathBuf::from("/tmp");
            let launcher = EngineLauncher::new(
                PathBuf::from("/definitely/not/an/engine"),
                root.clone(),
                EngineSettings::default(),
            );

            let err = prepare_session(&launcher, &root, Path::new("/books/x.epub"), false)
                .await
                .unwrap_err();
            assert!(matches!(err, PrepareError::SpawnFailed { .. }));
        }
    }
}
