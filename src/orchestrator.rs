//! Backup orchestrator
//!
//! Drives one run through its stages:
//!
//! ```text
//! INIT -> VALIDATING -> SELECTING -> SNAPSHOTTING
//!      -> per unit: [PRE_RETAINING] -> SENDING -> [POST_RETAINING]
//!      -> CLEANING_UP -> DONE
//! ```
//!
//! Any stage may fail. Nothing mutates before SNAPSHOTTING, and once the
//! run snapshot exists CLEANING_UP runs on every path. A failure is logged,
//! handed to the notifier (whose own failure is only logged) and returned
//! unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::collaborators::{Compressor, Notifier, RemoteStore, SnapshotStore};
use crate::config::BackupConfig;
use crate::error::{BackupError, BackupResult};
use crate::filter;
use crate::models::{BackupMode, Dataset, RunTimestamp};
use crate::retention::{self, EvictionReport, RetentionEngine};
use crate::snapshot::SnapshotManager;
use crate::transfer::{TransferPipeline, TransferReport, TransferUnit};

/// Where a run is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Init,
    Validating,
    Selecting,
    Snapshotting,
    PreRetaining,
    Sending,
    PostRetaining,
    CleaningUp,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Validating => "validating",
            Self::Selecting => "selecting",
            Self::Snapshotting => "snapshotting",
            Self::PreRetaining => "pre-send retention",
            Self::Sending => "sending",
            Self::PostRetaining => "post-send retention",
            Self::CleaningUp => "cleaning up",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The single terminal error of a failed run
#[derive(Debug)]
pub struct RunFailure {
    pub stage: RunStage,
    /// Dataset of the unit being processed, if any
    pub dataset: Option<String>,
    pub error: BackupError,
}

impl RunFailure {
    pub fn new(stage: RunStage, error: BackupError) -> Self {
        Self {
            stage,
            dataset: None,
            error,
        }
    }

    pub fn for_dataset(stage: RunStage, dataset: &str, error: BackupError) -> Self {
        Self {
            stage,
            dataset: Some(dataset.to_string()),
            error,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stage)?;
        if let Some(dataset) = &self.dataset {
            write!(f, " (dataset {})", dataset)?;
        }
        write!(f, ": {}", self.error)
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// External systems a run talks to
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub storage: &'a dyn SnapshotStore,
    pub compressor: &'a dyn Compressor,
    pub remote: &'a dyn RemoteStore,
    pub notifier: Option<&'a dyn Notifier>,
}

/// One unit of work: what is sent, where, and which namespace it rotates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub dataset: Dataset,
    pub namespace: String,
    pub transfer: TransferUnit,
}

/// Result of a dry run
#[derive(Debug, Clone)]
pub struct Plan {
    pub label: String,
    pub mode: BackupMode,
    pub units: Vec<PlannedUnit>,
    /// Keys each unit's retention would delete, in unit order
    pub victims: Vec<Vec<String>>,
}

/// Outcome of one unit
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub dataset: String,
    pub transfer: TransferReport,
    pub evictions: Vec<EvictionReport>,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub label: String,
    pub pool: String,
    pub mode: BackupMode,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub units: Vec<UnitReport>,
    /// False when the run snapshot could not be destroyed
    pub snapshot_destroyed: bool,
}

impl RunReport {
    pub fn bytes_written(&self) -> u64 {
        self.units.iter().map(|u| u.transfer.bytes_written).sum()
    }

    pub fn evicted(&self) -> usize {
        self.units
            .iter()
            .flat_map(|u| &u.evictions)
            .map(EvictionReport::evicted_count)
            .sum()
    }

    pub fn failed_deletes(&self) -> Vec<(String, String)> {
        self.units
            .iter()
            .flat_map(|u| &u.evictions)
            .flat_map(|e| e.failed.iter().cloned())
            .collect()
    }
}

/// Runs one backup against a validated configuration
pub struct BackupRunner<'a> {
    config: &'a BackupConfig,
    collab: Collaborators<'a>,
    cancel: CancelToken,
}

impl<'a> BackupRunner<'a> {
    pub fn new(config: &'a BackupConfig, collab: Collaborators<'a>, cancel: CancelToken) -> Self {
        Self {
            config,
            collab,
            cancel,
        }
    }

    /// Run now
    pub fn run(&self) -> Result<RunReport, RunFailure> {
        self.run_at(RunTimestamp::now())
    }

    /// Run with a fixed timestamp (snapshot label and key suffix)
    pub fn run_at(&self, timestamp: RunTimestamp) -> Result<RunReport, RunFailure> {
        let run_id = Uuid::new_v4();
        let label = timestamp.label();
        let span = info_span!("backup_run", %run_id, %label, pool = %self.config.pool);
        let _enter = span.enter();

        info!(
            stage = %RunStage::Init,
            mode = %self.config.mode,
            filter = %self.config.filter,
            remote = %self.collab.remote.location(),
            "Starting backup"
        );

        match self.execute(run_id, &timestamp) {
            Ok(report) => {
                info!(
                    stage = %RunStage::Done,
                    units = report.units.len(),
                    bytes_written = report.bytes_written(),
                    evicted = report.evicted(),
                    duration_secs = report.duration.as_secs_f64(),
                    "Backup complete"
                );
                Ok(report)
            }
            Err(failure) => {
                error!(
                    stage = %RunStage::Failed,
                    failed_during = %failure.stage,
                    dataset = failure.dataset.as_deref(),
                    error = %failure.error,
                    "Backup failed"
                );
                self.notify(&failure);
                Err(failure)
            }
        }
    }

    fn notify(&self, failure: &RunFailure) {
        let Some(notifier) = self.collab.notifier else {
            return;
        };
        let message = failure_message(&self.config.pool, failure);
        if let Err(e) = notifier.notify(&message) {
            warn!(error = %e, "Failed to deliver failure notification");
        }
    }

    fn execute(&self, run_id: Uuid, timestamp: &RunTimestamp) -> Result<RunReport, RunFailure> {
        let started_at = Utc::now();
        let started = Instant::now();
        let label = timestamp.label();

        let units = self.prepare(timestamp)?;

        self.checkpoint(RunStage::Snapshotting, None)?;
        let manager = SnapshotManager::new(self.collab.storage);
        let guard = manager
            .acquire(self.config.snapshot_root(), &label, true)
            .map_err(|e| RunFailure::new(RunStage::Snapshotting, e))?;

        let outcome = self.send_all(&units);

        info!(stage = %RunStage::CleaningUp, "Releasing run snapshot");
        let snapshot_destroyed = match guard.release() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to destroy run snapshot; it must be removed by hand");
                false
            }
        };

        let units = outcome?;
        Ok(RunReport {
            run_id,
            label,
            pool: self.config.pool.clone(),
            mode: self.config.mode,
            started_at,
            duration: started.elapsed(),
            units,
            snapshot_destroyed,
        })
    }

    /// VALIDATING and SELECTING: no side effects
    fn prepare(&self, timestamp: &RunTimestamp) -> Result<Vec<PlannedUnit>, RunFailure> {
        self.checkpoint(RunStage::Validating, None)?;
        self.config
            .validate()
            .map_err(|e| RunFailure::new(RunStage::Validating, e))?;

        self.checkpoint(RunStage::Selecting, None)?;
        let datasets = self
            .collab
            .storage
            .list_datasets(&self.config.pool)
            .map_err(|e| RunFailure::new(RunStage::Selecting, e))?;
        let selected = filter::select(&datasets, &self.config.filter)
            .map_err(|e| RunFailure::new(RunStage::Selecting, e))?;

        let units = plan_units(self.config, &selected, timestamp)
            .map_err(|e| RunFailure::new(RunStage::Selecting, e))?;
        info!(
            candidates = datasets.len(),
            units = units.len(),
            "Selected backup units"
        );
        Ok(units)
    }

    /// Units one at a time, stopping at the first failure
    fn send_all(&self, units: &[PlannedUnit]) -> Result<Vec<UnitReport>, RunFailure> {
        let pipeline = TransferPipeline::new(
            self.collab.storage,
            self.collab.compressor,
            self.collab.remote,
            self.cancel.clone(),
        );
        let engine = RetentionEngine::new(self.collab.remote);
        let policy = self.config.retention;

        let mut reports = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            let dataset = unit.dataset.name();
            info!(
                unit = index + 1,
                of = units.len(),
                dataset,
                key = %unit.transfer.object_key,
                "Processing unit"
            );
            let mut evictions = Vec::new();

            if let Some(keep) = policy.and_then(|p| p.keep_before_send()) {
                self.checkpoint(RunStage::PreRetaining, Some(dataset))?;
                let report = engine
                    .enforce(&unit.namespace, keep)
                    .map_err(|e| RunFailure::for_dataset(RunStage::PreRetaining, dataset, e))?;
                evictions.push(report);
            }

            self.checkpoint(RunStage::Sending, Some(dataset))?;
            let transfer = pipeline
                .send(&unit.transfer)
                .map_err(|e| RunFailure::for_dataset(RunStage::Sending, dataset, e))?;

            if let Some(keep) = policy.and_then(|p| p.keep_after_send()) {
                self.checkpoint(RunStage::PostRetaining, Some(dataset))?;
                let report = engine
                    .enforce(&unit.namespace, keep)
                    .map_err(|e| RunFailure::for_dataset(RunStage::PostRetaining, dataset, e))?;
                evictions.push(report);
            }

            reports.push(UnitReport {
                dataset: dataset.to_string(),
                transfer,
                evictions,
            });
        }

        Ok(reports)
    }

    /// Enter `stage`, failing if the run was cancelled
    fn checkpoint(&self, stage: RunStage, dataset: Option<&str>) -> Result<(), RunFailure> {
        tracing::debug!(%stage, dataset, "Entering stage");
        self.cancel.check(&stage.to_string()).map_err(|e| RunFailure {
            stage,
            dataset: dataset.map(str::to_string),
            error: e,
        })
    }

    /// Dry run: what a run at `timestamp` would send and delete
    ///
    /// Lists the pool and the remote but creates, uploads and deletes
    /// nothing.
    pub fn plan(&self, timestamp: &RunTimestamp) -> Result<Plan, RunFailure> {
        let units = self.prepare(timestamp)?;

        let listing = match self.config.retention {
            Some(_) => self.collab.remote.list().map_err(|e| {
                RunFailure::new(
                    RunStage::PreRetaining,
                    BackupError::Retention(format!("listing failed: {}", e)),
                )
            })?,
            None => Vec::new(),
        };

        let victims = units
            .iter()
            .map(|unit| match self.config.retention {
                None => Vec::new(),
                Some(policy) => match (policy.keep_before_send(), policy.keep_after_send()) {
                    (Some(keep), _) => victim_keys(&listing, &unit.namespace, keep),
                    (None, Some(keep)) => {
                        let mut with_new = listing.clone();
                        with_new.push(unit.transfer.object_key.clone());
                        victim_keys(&with_new, &unit.namespace, keep)
                    }
                    (None, None) => Vec::new(),
                },
            })
            .collect();

        Ok(Plan {
            label: timestamp.label(),
            mode: self.config.mode,
            units,
            victims,
        })
    }
}

fn victim_keys(listing: &[String], namespace: &str, keep: usize) -> Vec<String> {
    retention::decide(listing, namespace, keep)
        .victims
        .into_iter()
        .map(|a| a.key)
        .collect()
}

/// Build the unit list for the selected datasets
///
/// Whole-pool mode sends one replication stream of the root; split mode
/// sends every selected dataset on its own, in selection order.
///
/// Fails with a `Config` error when two selected datasets flatten to the
/// same name (`tank/a-b` and `tank/a/b`), since they would share an object
/// key and a retention namespace.
pub fn plan_units(
    config: &BackupConfig,
    selected: &[Dataset],
    timestamp: &RunTimestamp,
) -> BackupResult<Vec<PlannedUnit>> {
    let label = timestamp.label();
    let naming = &config.naming;

    match config.mode {
        BackupMode::Full => {
            let root = Dataset::new(config.pool.clone());
            Ok(vec![PlannedUnit {
                namespace: naming.namespace(BackupMode::Full, root.name()),
                transfer: TransferUnit {
                    source_ref: root.snapshot_ref(&label),
                    object_key: naming.object_key(BackupMode::Full, root.name(), timestamp),
                    replicate: true,
                },
                dataset: root,
            }])
        }
        BackupMode::Split => {
            check_flat_names(selected)?;
            Ok(selected
                .iter()
                .map(|ds| PlannedUnit {
                    dataset: ds.clone(),
                    namespace: naming.namespace(BackupMode::Split, ds.name()),
                    transfer: TransferUnit {
                        source_ref: ds.snapshot_ref(&label),
                        object_key: naming.object_key(BackupMode::Split, ds.name(), timestamp),
                        replicate: false,
                    },
                })
                .collect())
        }
    }
}

fn check_flat_names(selected: &[Dataset]) -> BackupResult<()> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    let mut clashes = Vec::new();
    for ds in selected {
        if let Some(first) = seen.insert(ds.flat_name(), ds.name()) {
            clashes.push(format!(
                "'{}' and '{}' both map to '{}'",
                first,
                ds.name(),
                ds.flat_name()
            ));
        }
    }

    if clashes.is_empty() {
        Ok(())
    } else {
        Err(BackupError::Config(format!(
            "datasets would overwrite each other's backups: {}; exclude one of them",
            clashes.join(", ")
        )))
    }
}

/// Text handed to the notifier
pub fn failure_message(pool: &str, failure: &RunFailure) -> String {
    format!("{} backup failed during {}", pool, failure)
}
