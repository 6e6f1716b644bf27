//! Process-tree control for engine subprocesses
//!
//! The engine forks helpers of its own (model runner, ffmpeg), so killing
//! only the direct child leaves orphans synthesizing into a dead session.
//! Every engine process is spawned as the leader of its own process group
//! and termination always targets the whole tree.

use tokio::process::Command;
use tracing::{debug, warn};

/// Make the spawned process the leader of its own process group
///
/// Must be applied before spawn. On Windows processes are not grouped;
/// [`terminate_process_tree`] walks the tree there instead.
pub fn own_process_group(cmd: &mut Command) {
    cmd.kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);
}

/// Force-kill the whole process tree rooted at `pid`
#[cfg(unix)]
pub fn terminate_process_tree(pid: u32) {
    // The child is its own group leader, so its pid doubles as the pgid
    let ret = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if ret == 0 {
        debug!(pid = pid, "Killed process group");
    } else {
        let err = std::io::Error::last_os_error();
        // ESRCH means the tree is already gone
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid = pid, error = %err, "Failed to kill process group");
        }
    }
}

/// Force-kill the whole process tree rooted at `pid`
#[cfg(windows)]
pub fn terminate_process_tree(pid: u32) {
    match std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
    {
        Ok(out) if out.status.success() => debug!(pid = pid, "Killed process tree"),
        Ok(out) => warn!(pid = pid, code = ?out.status.code(), "taskkill failed"),
        Err(e) => warn!(pid = pid, error = %e, "Failed to run taskkill"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn test_terminate_process_tree_kills_group() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30").stdout(Stdio::null()).stderr(Stdio::null());
        own_process_group(&mut cmd);

        let mut child = cmd.spawn().unwrap();
        terminate_process_tree(child.id().unwrap());

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_gone_process_is_harmless() {
        let mut cmd = Command::new("true");
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        own_process_group(&mut cmd);

        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();
        // Already reaped, must not signal a recycled pid group
        terminate_process_tree(pid);
    }
}
