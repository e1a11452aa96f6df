//! Shell-command notifier
//!
//! Runs a user-supplied command through `sh -c`. The message is passed both
//! on stdin and in the `BACKUP_MESSAGE` environment variable, so either
//! `mail -s "backup" root` or `curl -d "$BACKUP_MESSAGE" ...` works.
//! A command still running after [`NOTIFY_TIMEOUT`] is killed.

use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::process::{abandon, wait_while, StderrCollector};
use super::Notifier;
use crate::error::{BackupError, BackupResult};

/// Environment variable carrying the message
pub const MESSAGE_ENV: &str = "BACKUP_MESSAGE";

/// Default limit on how long a notification command may run
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: NOTIFY_TIMEOUT,
        }
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, message: &str) -> BackupResult<()> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(MESSAGE_ENV, message)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackupError::Notify(format!("Failed to run '{}': {}", self.command, e)))?;
        let stderr = StderrCollector::start(&mut child);

        if let Some(mut stdin) = child.stdin.take() {
            // commands that ignore stdin may exit before reading it
            if let Err(e) = stdin.write_all(message.as_bytes()) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    abandon(&mut child);
                    return Err(BackupError::Notify(format!(
                        "Failed to pass message to '{}': {}",
                        self.command, e
                    )));
                }
            }
        }

        let deadline = Instant::now() + self.timeout;
        let waited = wait_while(&mut child, || Instant::now() < deadline)
            .map_err(|e| BackupError::Notify(format!("Failed to wait for '{}': {}", self.command, e)))?;
        let Some(status) = waited else {
            abandon(&mut child);
            return Err(BackupError::Notify(format!(
                "'{}' timed out after {}s",
                self.command,
                self.timeout.as_secs_f64()
            )));
        };
        if !status.success() {
            let stderr = stderr.finish();
            return Err(BackupError::Notify(format!(
                "'{}' {}{}",
                self.command,
                status,
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr)
                }
            )));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_message_on_stdin_and_env() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let command = format!(
            "cat > '{0}.stdin'; printf '%s' \"$BACKUP_MESSAGE\" > '{0}.env'",
            out.display()
        );

        CommandNotifier::new(command)
            .notify("tank backup failed during sending: boom")
            .unwrap();

        let stdin = fs::read_to_string(format!("{}.stdin", out.display())).unwrap();
        let env = fs::read_to_string(format!("{}.env", out.display())).unwrap();
        assert_eq!(stdin, "tank backup failed during sending: boom");
        assert_eq!(env, stdin);
    }

    #[test]
    fn test_failing_command() {
        let err = CommandNotifier::new("echo nope >&2; exit 3")
            .notify("x")
            .unwrap_err();
        assert!(matches!(err, BackupError::Notify(_)));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_hanging_command_is_killed() {
        let started = Instant::now();
        let notifier = CommandNotifier {
            timeout: Duration::from_millis(200),
            ..CommandNotifier::new("sleep 30")
        };
        let err = notifier.notify("x").unwrap_err();

        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
