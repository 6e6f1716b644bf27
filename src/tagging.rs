//! Metadata tagging wrapper
//!
//! The assembled audiobook gets its final metadata from an external tagging
//! tool invoked as a subprocess. Tagging is post-processing: every failure
//! here is logged and absorbed, the audiobook itself is already done.

use crate::config::OutputMetadata;
use crate::error::{TaggingError, TaggingResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Wrapper around the external tagging binary
#[derive(Debug, Clone)]
pub struct Tagger {
    binary: PathBuf,
}

impl Tagger {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Apply caller metadata to `file` in place
    ///
    /// No-op when the metadata carries nothing.
    pub async fn apply(&self, file: &Path, meta: &OutputMetadata) -> TaggingResult<()> {
        if meta.is_empty() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("tag");
        if let Some(title) = &meta.title {
            cmd.arg("--title").arg(title);
        }
        if let Some(author) = &meta.author {
            cmd.arg("--author").arg(author);
        }
        if let Some(year) = meta.year {
            cmd.arg("--year").arg(year.to_string());
        }
        if let Some(cover) = &meta.cover {
            cmd.arg("--cover").arg(cover);
        }
        cmd.arg(file);

        debug!(file = %file.display(), "Applying metadata tags");
        self.run(cmd).await
    }

    /// Remove an engine-embedded cover image from `file`
    pub async fn strip_cover(&self, file: &Path) -> TaggingResult<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("strip-cover").arg(file);
        self.run(cmd).await
    }

    async fn run(&self, mut cmd: Command) -> TaggingResult<()> {
        cmd.stdin(Stdio::null());
        let output = cmd
            .output()
            .await
            .map_err(|e| TaggingError::ToolUnavailable {
                binary: self.binary.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TaggingError::ToolFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-tagger");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn metadata() -> OutputMetadata {
        OutputMetadata {
            title: Some("My Book".into()),
            author: Some("Jane Doe".into()),
            year: Some(2024),
            cover: None,
        }
    }

    #[tokio::test]
    async fn test_apply_passes_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("args.txt");
        let tool = fake_tool(tmp.path(), &format!("echo \"$@\" > {}", log.display()));

        Tagger::new(tool)
            .apply(Path::new("/tmp/book.m4b"), &metadata())
            .await
            .unwrap();

        let args = fs::read_to_string(&log).unwrap();
        assert!(args.starts_with("tag "));
        assert!(args.contains("--title My Book"));
        assert!(args.contains("--author Jane Doe"));
        assert!(args.contains("--year 2024"));
        assert!(args.contains("/tmp/book.m4b"));
    }

    #[tokio::test]
    async fn test_apply_empty_metadata_skips_tool() {
        // Binary does not even exist; empty metadata must not touch it
        let tagger = Tagger::new(PathBuf::from("/definitely/not/a/tagger"));
        tagger
            .apply(Path::new("/tmp/book.m4b"), &OutputMetadata::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tool_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = fake_tool(tmp.path(), "echo 'bad atom' >&2; exit 2");

        let err = Tagger::new(tool)
            .apply(Path::new("/tmp/book.m4b"), &metadata())
            .await
            .unwrap_err();
        match err {
            TaggingError::ToolFailed { code, stderr } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "bad atom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_tool_unavailable() {
        let err = Tagger::new(PathBuf::from("/definitely/not/a/tagger"))
            .strip_cover(Path::new("/tmp/book.m4b"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaggingError::ToolUnavailable { .. }));
    }
}
