//! Helpers for driving external command-line tools

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::cancel::{CancelToken, POLL_INTERVAL};
use crate::error::{BackupError, BackupResult};

/// Render a command line for logs and error messages
pub(crate) fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

/// Run a command to completion, capturing stdout and stderr
pub(crate) fn capture(cmd: &mut Command) -> BackupResult<Output> {
    tracing::debug!(command = %describe(cmd), "Running command");
    cmd.stdin(Stdio::null())
        .output()
        .map_err(|e| BackupError::Io(format!("Failed to run '{}': {}", describe(cmd), e)))
}

/// Trimmed stderr of a finished command, or its exit status when silent
pub(crate) fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

/// Reads a child's piped stderr on its own thread
///
/// A child blocked writing to a full stderr pipe never exits, so stderr is
/// drained concurrently with stdout and the final wait.
pub(crate) struct StderrCollector {
    handle: Option<JoinHandle<String>>,
}

impl StderrCollector {
    /// Take the child's stderr pipe; collects nothing if it was not piped
    pub(crate) fn start(child: &mut Child) -> Self {
        let handle = child.stderr.take().and_then(|mut stderr| {
            thread::Builder::new()
                .name("child-stderr".into())
                .spawn(move || {
                    let mut raw = Vec::new();
                    let _ = stderr.read_to_end(&mut raw);
                    String::from_utf8_lossy(&raw).trim().to_string()
                })
                .ok()
        });
        Self { handle }
    }

    /// Everything the child wrote, once its stderr has closed
    pub(crate) fn finish(mut self) -> String {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

/// Poll `child` until it exits or `keep_waiting` returns false
///
/// `Ok(None)` means the wait was given up; the child is still running.
pub(crate) fn wait_while(
    child: &mut Child,
    mut keep_waiting: impl FnMut() -> bool,
) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if !keep_waiting() {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run `work` while a watcher kills `child` as soon as `cancel` trips
///
/// Killing the child makes any pipe `work` is blocked on fail, so the work
/// returns promptly instead of waiting on a stalled tool.
pub(crate) fn kill_on_cancel<T>(
    child: Child,
    cancel: &CancelToken,
    work: impl FnOnce() -> T,
) -> (Child, T) {
    let child = Mutex::new(child);
    let done = AtomicBool::new(false);

    let result = thread::scope(|scope| {
        scope.spawn(|| {
            loop {
                if cancel.is_cancelled() {
                    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
                    let _ = child.kill();
                    return;
                }
                if done.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
        });
        let result = work();
        done.store(true, Ordering::SeqCst);
        result
    });

    (child.into_inner().unwrap_or_else(PoisonError::into_inner), result)
}

/// Kill and reap a child that is being abandoned
pub(crate) fn abandon(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_chatty_stderr_does_not_block_exit() {
        let mut child = Command::new("sh")
            .args(["-c", "head -c 200000 /dev/zero | tr '\\0' w >&2; exit 3"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = StderrCollector::start(&mut child);

        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(stderr.finish().len(), 200_000);
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_while_gives_up() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(100);

        let status = wait_while(&mut child, || std::time::Instant::now() < deadline).unwrap();
        assert!(status.is_none());
        abandon(&mut child);
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_on_cancel_unblocks_work() {
        let child = Command::new("sleep").arg("5").spawn().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let (mut child, ()) = kill_on_cancel(child, &cancel, || {
            thread::sleep(std::time::Duration::from_millis(50));
        });
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_describe() {
        let mut cmd = Command::new("zfs");
        cmd.args(["snapshot", "-r", "tank@x"]);
        assert_eq!(describe(&cmd), "zfs snapshot -r tank@x");
    }
}
