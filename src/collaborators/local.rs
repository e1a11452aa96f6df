//! Directory-backed remote store
//!
//! Objects are plain files under a root directory. Uploads are written to a
//! `.partial` sibling and renamed into place only after a clean EOF and an
//! fsync, so a listing never shows a half-written artifact.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::RemoteStore;
use crate::error::{BackupError, BackupResult};

/// Suffix of in-progress uploads
pub const PARTIAL_SUFFIX: &str = ".partial";

/// A remote store rooted at a local directory (`file://` targets)
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> BackupResult<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(BackupError::Remote(format!("Invalid object key '{}'", key)));
        }
        Ok(self.root.join(key))
    }

    fn write_partial(&self, temp_path: &Path, data: &mut dyn Read) -> io::Result<u64> {
        let file = File::create(temp_path)?;
        let mut writer = BufWriter::new(file);
        let written = io::copy(data, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(written)
    }
}

impl RemoteStore for LocalStore {
    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn list(&self) -> BackupResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::Remote(format!(
                    "Failed to list {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BackupError::Remote(format!("Failed to list {}: {}", self.root.display(), e))
            })?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            keys.push(name);
        }

        keys.sort();
        Ok(keys)
    }

    fn write(&self, key: &str, data: &mut dyn Read) -> BackupResult<u64> {
        let path = self.object_path(key)?;

        fs::create_dir_all(&self.root).map_err(|e| {
            BackupError::Remote(format!(
                "Failed to create directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let temp_path = self.root.join(format!("{}{}", key, PARTIAL_SUFFIX));

        let written = match self.write_partial(&temp_path, data) {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(BackupError::Remote(format!(
                    "Failed to write {}: {}",
                    key, e
                )));
            }
        };

        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            BackupError::Remote(format!("Failed to commit {}: {}", key, e))
        })?;

        debug!(key, bytes = written, "Object committed");
        Ok(written)
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackupError::object_not_found(key)),
            Err(e) => Err(BackupError::Remote(format!("Failed to delete {}: {}", key, e))),
        }
    }
}
