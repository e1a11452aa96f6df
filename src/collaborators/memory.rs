//! In-memory collaborators
//!
//! `MemoryPool`, `MemoryStore` and `RecordingNotifier` behave like the real
//! adapters (same error kinds, same atomicity) and record every call, so
//! tests can assert on ordering and inject failures at each step.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Notifier, RemoteStore, SnapshotStore, SnapshotStream};
use crate::error::{BackupError, BackupResult};
use crate::models::Dataset;

/// A call observed by [`MemoryPool`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolCall {
    List(String),
    Create(String),
    Destroy(String),
    Send(String),
}

#[derive(Default)]
struct PoolState {
    snapshots: BTreeSet<String>,
    calls: Vec<PoolCall>,
    fail_list: Option<String>,
    fail_create: Option<String>,
    fail_destroy: Option<String>,
    /// snapshot ref -> bytes delivered before the stream errors
    fail_send: BTreeMap<String, usize>,
}

/// A fake storage pool with a fixed dataset tree
pub struct MemoryPool {
    root: String,
    datasets: Vec<Dataset>,
    payload: Vec<u8>,
    state: Mutex<PoolState>,
}

impl MemoryPool {
    /// A pool whose tree is `root` followed by `children`
    pub fn new(root: &str, children: &[&str]) -> Self {
        let datasets = std::iter::once(root)
            .chain(children.iter().copied())
            .map(Dataset::new)
            .collect();

        Self {
            root: root.to_string(),
            datasets,
            payload: b"zfs send stream ".repeat(64),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Bytes every snapshot stream yields
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_list(&self, message: &str) {
        self.state().fail_list = Some(message.to_string());
    }

    pub fn fail_create(&self, message: &str) {
        self.state().fail_create = Some(message.to_string());
    }

    pub fn fail_destroy(&self, message: &str) {
        self.state().fail_destroy = Some(message.to_string());
    }

    /// Make the stream of `snapshot_ref` error after `after_bytes`
    pub fn fail_send(&self, snapshot_ref: &str, after_bytes: usize) {
        self.state()
            .fail_send
            .insert(snapshot_ref.to_string(), after_bytes);
    }

    pub fn has_snapshot(&self, snapshot_ref: &str) -> bool {
        self.state().snapshots.contains(snapshot_ref)
    }

    pub fn snapshot_count(&self) -> usize {
        self.state().snapshots.len()
    }

    pub fn calls(&self) -> Vec<PoolCall> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&PoolCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Snapshot refs that were streamed, in order
    pub fn sent(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                PoolCall::Send(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    fn descendants_of<'a>(&'a self, root: &'a str) -> impl Iterator<Item = &'a Dataset> + 'a {
        self.datasets.iter().filter(move |ds| {
            ds.name() == root
                || ds
                    .name()
                    .strip_prefix(root)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

impl SnapshotStore for MemoryPool {
    fn list_datasets(&self, root: &str) -> BackupResult<Vec<Dataset>> {
        let mut state = self.state();
        state.calls.push(PoolCall::List(root.to_string()));
        if let Some(msg) = &state.fail_list {
            return Err(BackupError::Storage(msg.clone()));
        }
        drop(state);

        let found: Vec<Dataset> = self.descendants_of(root).cloned().collect();
        if found.is_empty() {
            return Err(BackupError::NotFound {
                entity_type: "Dataset",
                identifier: root.to_string(),
            });
        }
        Ok(found)
    }

    fn create_snapshot(&self, root: &str, label: &str, recursive: bool) -> BackupResult<()> {
        let reference = format!("{}@{}", root, label);
        let mut state = self.state();
        state.calls.push(PoolCall::Create(reference.clone()));

        if let Some(msg) = &state.fail_create {
            return Err(BackupError::SnapshotCreate(msg.clone()));
        }
        if state.snapshots.contains(&reference) {
            return Err(BackupError::SnapshotCreate(format!(
                "snapshot {} already exists",
                reference
            )));
        }
        if !self.datasets.iter().any(|d| d.name() == root) {
            return Err(BackupError::SnapshotCreate(format!(
                "dataset {} does not exist",
                root
            )));
        }

        if recursive {
            let refs: Vec<String> = self
                .descendants_of(root)
                .map(|ds| ds.snapshot_ref(label))
                .collect();
            state.snapshots.extend(refs);
        } else {
            state.snapshots.insert(reference);
        }
        Ok(())
    }

    fn destroy_snapshot(&self, snapshot_ref: &str, recursive: bool) -> BackupResult<()> {
        let mut state = self.state();
        state.calls.push(PoolCall::Destroy(snapshot_ref.to_string()));

        if let Some(msg) = &state.fail_destroy {
            return Err(BackupError::SnapshotDestroy(msg.clone()));
        }
        if !state.snapshots.contains(snapshot_ref) {
            return Err(BackupError::snapshot_not_found(snapshot_ref));
        }

        match snapshot_ref.split_once('@') {
            Some((root, label)) if recursive => {
                let doomed: Vec<String> = self
                    .descendants_of(root)
                    .map(|ds| ds.snapshot_ref(label))
                    .collect();
                for r in doomed {
                    state.snapshots.remove(&r);
                }
            }
            _ => {
                state.snapshots.remove(snapshot_ref);
            }
        }
        Ok(())
    }

    fn open_stream(
        &self,
        snapshot_ref: &str,
        replicate: bool,
    ) -> BackupResult<Box<dyn SnapshotStream>> {
        let mut state = self.state();
        state.calls.push(PoolCall::Send(snapshot_ref.to_string()));

        if !state.snapshots.contains(snapshot_ref) {
            return Err(BackupError::snapshot_not_found(snapshot_ref));
        }

        let mut data = self.payload.clone();
        if replicate && snapshot_ref.starts_with(&format!("{}@", self.root)) {
            // replication streams carry every descendant
            let count = self.datasets.len();
            data = data.repeat(count.max(1));
        }

        Ok(Box::new(MemoryStream {
            data: io::Cursor::new(data),
            fail_after: state.fail_send.get(snapshot_ref).copied(),
        }))
    }
}

struct MemoryStream {
    data: io::Cursor<Vec<u8>>,
    fail_after: Option<usize>,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(limit) = self.fail_after {
            let pos = self.data.position() as usize;
            if pos >= limit {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "cannot send snapshot: I/O error",
                ));
            }
            let allowed = (limit - pos).min(buf.len());
            return self.data.read(&mut buf[..allowed]);
        }
        self.data.read(buf)
    }
}

impl SnapshotStream for MemoryStream {
    fn finish(&mut self) -> BackupResult<()> {
        Ok(())
    }
}

/// A call observed by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List,
    Write(String),
    Delete(String),
}

#[derive(Default)]
struct StoreState {
    objects: BTreeMap<String, Vec<u8>>,
    calls: Vec<StoreCall>,
    fail_list: Option<String>,
    fail_write: Option<String>,
    fail_delete: BTreeSet<String>,
}

/// A fake object store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with empty objects under `keys`
    pub fn with_keys<S: AsRef<str>>(keys: &[S]) -> Self {
        let store = Self::new();
        {
            let mut state = store.state();
            for key in keys {
                state.objects.insert(key.as_ref().to_string(), Vec::new());
            }
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_list(&self, message: &str) {
        self.state().fail_list = Some(message.to_string());
    }

    pub fn fail_write(&self, message: &str) {
        self.state().fail_write = Some(message.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.state().fail_delete.insert(key.to_string());
    }

    /// Committed keys in ascending order
    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state().objects.get(key).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }
}

impl RemoteStore for MemoryStore {
    fn location(&self) -> String {
        "memory://".to_string()
    }

    fn list(&self) -> BackupResult<Vec<String>> {
        let mut state = self.state();
        state.calls.push(StoreCall::List);
        if let Some(msg) = &state.fail_list {
            return Err(BackupError::Remote(msg.clone()));
        }
        Ok(state.objects.keys().cloned().collect())
    }

    fn write(&self, key: &str, data: &mut dyn Read) -> BackupResult<u64> {
        self.state().calls.push(StoreCall::Write(key.to_string()));

        // drain outside the lock; the producer may be slow
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)
            .map_err(|e| BackupError::Remote(format!("upload of {} aborted: {}", key, e)))?;

        let mut state = self.state();
        if let Some(msg) = &state.fail_write {
            return Err(BackupError::Remote(msg.clone()));
        }
        let written = buffer.len() as u64;
        state.objects.insert(key.to_string(), buffer);
        Ok(written)
    }

    fn delete(&self, key: &str) -> BackupResult<()> {
        let mut state = self.state();
        state.calls.push(StoreCall::Delete(key.to_string()));
        if state.fail_delete.contains(key) {
            return Err(BackupError::Remote(format!("access denied deleting {}", key)));
        }
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| BackupError::object_not_found(key))
    }
}

/// Collects notifications
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that records the message and then reports failure
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> BackupResult<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
        if self.fail {
            return Err(BackupError::Notify("notification endpoint unreachable".into()));
        }
        Ok(())
    }
}
