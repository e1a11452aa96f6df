//! ZFS storage adapter
//!
//! Drives the `zfs` command-line tool. Streams come straight from the
//! stdout of `zfs send`; the exit status is checked once the stream has
//! been drained so a send that dies halfway never looks like a short,
//! successful stream.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::debug;

use super::process::{abandon, capture, describe, failure_text, StderrCollector};
use super::{SnapshotStore, SnapshotStream};
use crate::error::{BackupError, BackupResult};
use crate::models::Dataset;

/// `zfs` CLI wrapper
#[derive(Debug, Clone)]
pub struct ZfsCli {
    binary: PathBuf,
}

impl ZfsCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new("zfs")
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("does not exist") || stderr.contains("could not find any snapshots")
}

impl SnapshotStore for ZfsCli {
    fn list_datasets(&self, root: &str) -> BackupResult<Vec<Dataset>> {
        let mut cmd = self.command();
        cmd.args(["list", "-H", "-o", "name", "-t", "filesystem,volume", "-r", root]);
        let output = capture(&mut cmd)?;

        if !output.status.success() {
            let text = failure_text(&output);
            if is_missing(&text) {
                return Err(BackupError::NotFound {
                    entity_type: "Dataset",
                    identifier: root.to_string(),
                });
            }
            return Err(BackupError::Storage(format!("zfs list {}: {}", root, text)));
        }

        let datasets: Vec<Dataset> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Dataset::new)
            .collect();

        debug!(root, count = datasets.len(), "Listed datasets");
        Ok(datasets)
    }

    fn create_snapshot(&self, root: &str, label: &str, recursive: bool) -> BackupResult<()> {
        let reference = format!("{}@{}", root, label);
        let mut cmd = self.command();
        cmd.arg("snapshot");
        if recursive {
            cmd.arg("-r");
        }
        cmd.arg(&reference);

        let output = capture(&mut cmd)?;
        if !output.status.success() {
            return Err(BackupError::SnapshotCreate(format!(
                "{}: {}",
                reference,
                failure_text(&output)
            )));
        }
        Ok(())
    }

    fn destroy_snapshot(&self, snapshot_ref: &str, recursive: bool) -> BackupResult<()> {
        if !snapshot_ref.contains('@') {
            // never hand a bare dataset name to `zfs destroy`
            return Err(BackupError::SnapshotDestroy(format!(
                "refusing to destroy '{}': not a snapshot",
                snapshot_ref
            )));
        }

        let mut cmd = self.command();
        cmd.arg("destroy");
        if recursive {
            cmd.arg("-r");
        }
        cmd.arg(snapshot_ref);

        let output = capture(&mut cmd)?;
        if !output.status.success() {
            let text = failure_text(&output);
            if is_missing(&text) {
                return Err(BackupError::snapshot_not_found(snapshot_ref));
            }
            return Err(BackupError::SnapshotDestroy(format!("{}: {}", snapshot_ref, text)));
        }
        Ok(())
    }

    fn open_stream(
        &self,
        snapshot_ref: &str,
        replicate: bool,
    ) -> BackupResult<Box<dyn SnapshotStream>> {
        let mut cmd = self.command();
        cmd.arg("send");
        if replicate {
            cmd.arg("-R");
        }
        cmd.arg(snapshot_ref)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let command_line = describe(&cmd);
        debug!(command = %command_line, "Spawning send");

        let mut child = cmd
            .spawn()
            .map_err(|e| BackupError::Storage(format!("Failed to run '{}': {}", command_line, e)))?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                abandon(&mut child);
                return Err(BackupError::Storage(format!(
                    "'{}' has no stdout pipe",
                    command_line
                )));
            }
        };

        let stderr = StderrCollector::start(&mut child);
        Ok(Box::new(ZfsSendStream {
            child,
            stdout,
            stderr: Some(stderr),
            command_line,
            finished: false,
        }))
    }
}

/// Stdout of a running `zfs send`
struct ZfsSendStream {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<StderrCollector>,
    command_line: String,
    finished: bool,
}

impl Read for ZfsSendStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl SnapshotStream for ZfsSendStream {
    fn finish(&mut self) -> BackupResult<()> {
        let status = self.child.wait().map_err(|e| {
            BackupError::Storage(format!("Failed to wait for '{}': {}", self.command_line, e))
        })?;
        self.finished = true;
        let stderr = self
            .stderr
            .take()
            .map(StderrCollector::finish)
            .unwrap_or_default();

        if !status.success() {
            let detail = if stderr.is_empty() {
                format!("exited with {}", status)
            } else {
                stderr
            };
            return Err(BackupError::Storage(format!(
                "'{}' failed: {}",
                self.command_line, detail
            )));
        }
        Ok(())
    }
}

impl Drop for ZfsSendStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(command = %self.command_line, "Aborting unfinished send");
            abandon(&mut self.child);
        }
    }
}
