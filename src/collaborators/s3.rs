//! S3 remote store via the `aws` CLI
//!
//! Uploads stream into `aws s3 cp -`, which performs a multipart upload
//! from stdin. The upload is only completed when stdin closes cleanly; on a
//! reader error the child is killed, the multipart upload is never
//! completed, and no object appears. Cancellation kills the child too, even
//! while the upload is stalled inside `aws`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use super::process::{abandon, capture, describe, failure_text, kill_on_cancel, wait_while, StderrCollector};
use super::RemoteStore;
use crate::cancel::CancelToken;
use crate::error::{BackupError, BackupResult};

/// `aws s3` CLI wrapper bound to one `s3://bucket/prefix/` location
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    binary: PathBuf,
    url: String,
    storage_class: Option<String>,
    cancel: CancelToken,
}

impl AwsCliStore {
    /// `url` must be an `s3://` URL; a trailing `/` is added if missing
    pub fn new(binary: impl Into<PathBuf>, url: &str, storage_class: Option<String>) -> Self {
        let mut url = url.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        Self {
            binary: binary.into(),
            url,
            storage_class,
            cancel: CancelToken::new(),
        }
    }

    /// Kill in-flight uploads once `cancel` trips
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn object_url(&self, key: &str) -> BackupResult<String> {
        if key.is_empty() || key.contains('/') {
            return Err(BackupError::Remote(format!("Invalid object key '{}'", key)));
        }
        Ok(format!("{}{}", self.url, key))
    }

    fn s3(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("s3");
        cmd
    }
}

/// Object names from `aws s3 ls` output; sub-prefixes are skipped
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with("PRE ") {
                return None;
            }
            // <date> <time> <size> <key>
            let mut fields = line.split_whitespace();
            fields.next()?;
            fields.next()?;
            fields.next()?;
            let key = fields.collect::<Vec<_>>().join(" ");
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        })
        .collect()
}

impl RemoteStore for AwsCliStore {
    fn location(&self) -> String {
        self.url.clone()
    }

    fn list(&self) -> BackupResult<Vec<String>> {
        let mut cmd = self.s3();
        cmd.args(["ls", &self.url]);
        let output = capture(&mut cmd)?;

        if !output.status.success() {
            // `aws s3 ls` exits 1 silently when the prefix holds nothing
            if output.status.code() == Some(1)
                && output.stdout.is_empty()
                && output.stderr.is_empty()
            {
                return Ok(Vec::new());
            }
            return Err(BackupError::Remote(format!(
                "Failed to list {}: {}",
                self.url,
                failure_text(&output)
            )));
        }

        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn write(&self, key: &str, data: &mut dyn io::Read) -> BackupResult<u64> {
        let target = self.object_url(key)?;

        let mut cmd = self.s3();
        cmd.args(["cp", "-", &target, "--only-show-errors"]);
        if let Some(class) = &self.storage_class {
            cmd.args(["--storage-class", class]);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let command_line = describe(&cmd);
        debug!(command = %command_line, "Spawning upload");

        let mut child = cmd
            .spawn()
            .map_err(|e| BackupError::Remote(format!("Failed to run '{}': {}", command_line, e)))?;

        let mut stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                abandon(&mut child);
                return Err(BackupError::Remote(format!(
                    "'{}' has no stdin pipe",
                    command_line
                )));
            }
        };
        let stderr = StderrCollector::start(&mut child);

        let (mut child, copied) = kill_on_cancel(child, &self.cancel, || {
            io::copy(data, &mut stdin).and_then(|n| stdin.flush().map(|_| n))
        });
        let written = match copied {
            Ok(n) if !self.cancel.is_cancelled() => n,
            outcome => {
                // kill before closing stdin so a truncated upload is never completed
                abandon(&mut child);
                drop(stdin);
                let cause = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "cancelled".to_string(),
                };
                let stderr = stderr.finish();
                let detail = if stderr.is_empty() {
                    cause
                } else {
                    format!("{} ({})", cause, stderr)
                };
                return Err(BackupError::Remote(format!(
                    "Upload of {} aborted: {}",
                    key, detail
                )));
            }
        };
        drop(stdin);

        let waited = wait_while(&mut child, || !self.cancel.is_cancelled()).map_err(|e| {
            BackupError::Remote(format!("Failed to wait for '{}': {}", command_line, e))
        })?;
        let Some(status) = waited else {
            abandon(&mut child);
            return Err(BackupError::Remote(format!(
                "Upload of {} aborted: cancelled while completing",
                key
            )));
        };
        let stderr = stderr.finish();
        if !status.success() {
            return Err(BackupError::Remote(format!(
                "Upload of {} failed: {}",
                key,
                if stderr.is_empty() {
                    format!("exited with {}", status)
                } else {
                    stderr
                }
            )));
        }

        Ok(written)
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        let target = self.object_url(key)?;
        let mut cmd = self.s3();
        cmd.args(["rm", &target, "--only-show-errors"]);
        let output = capture(&mut cmd)?;

        if !output.status.success() {
            let text = failure_text(&output);
            if text.contains("NoSuchKey") || text.contains("does not exist") {
                return Err(BackupError::object_not_found(key));
            }
            return Err(BackupError::Remote(format!("Failed to delete {}: {}", key, text)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let output = "\
                           PRE nested/
2025-01-01 00:00:05    1048576 full_tank_20250101_000000.zfs.zst
2025-01-02 00:00:07        512 full_tank_20250102_000000.zfs.zst

";
        assert_eq!(
            parse_listing(output),
            vec![
                "full_tank_20250101_000000.zfs.zst",
                "full_tank_20250102_000000.zfs.zst"
            ]
        );
    }

    #[test]
    fn test_url_normalised() {
        let store = AwsCliStore::new("aws", "s3://bucket/backups", None);
        assert_eq!(store.url(), "s3://bucket/backups/");
        assert_eq!(store.location(), "s3://bucket/backups/");
        assert_eq!(
            store.object_url("k.zst").unwrap(),
            "s3://bucket/backups/k.zst"
        );
        assert!(store.object_url("a/b").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_upload_and_list_with_fake_cli() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        // fake `aws s3`: cp stores stdin in $DIR, ls prints the stored files
        let dir = TempDir::new().unwrap();
        let script = format!(
            r#"#!/bin/sh
DIR='{}'
case "$2" in
  cp) cat > "$DIR/$(basename "$4")" ;;
  ls) for f in "$DIR"/*.zst; do [ -e "$f" ] && echo "2025-01-01 00:00:00 1 $(basename "$f")"; done; exit 0 ;;
  rm) rm "$DIR/$(basename "$3")" ;;
esac
"#,
            dir.path().display()
        );
        let bin = dir.path().join("aws");
        fs::write(&bin, script).unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        let store = AwsCliStore::new(&bin, "s3://bucket/p", Some("STANDARD_IA".into()));
        let written = store.write("a.zst", &mut &b"compressed"[..]).unwrap();
        assert_eq!(written, 10);
        assert_eq!(fs::read(dir.path().join("a.zst")).unwrap(), b"compressed");
        assert_eq!(store.list().unwrap(), vec!["a.zst"]);

        store.delete("a.zst").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_stalled_upload() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::thread;
        use std::time::{Duration, Instant};
        use tempfile::TempDir;

        // never reads stdin, so the pipe fills and the copy blocks
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("aws");
        fs::write(&bin, "#!/bin/sh\nexec sleep 30\n").unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();

        let cancel = CancelToken::new();
        let store = AwsCliStore::new(&bin, "s3://bucket", None).with_cancel(cancel.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let payload = vec![0u8; 4 * 1024 * 1024];
        let started = Instant::now();
        let err = store.write("stalled.zst", &mut &payload[..]).unwrap_err();
        canceller.join().unwrap();

        assert!(err.to_string().contains("aborted"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
