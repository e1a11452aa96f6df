//! Command handlers
//!
//! Bridges clap parsing and the orchestrator: builds the concrete
//! collaborators for a resolved configuration and runs, plans or prints.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use tracing::warn;

use super::args::SettingsArgs;
use crate::cancel::CancelToken;
use crate::collaborators::{
    AwsCliStore, CommandNotifier, Compressor, LocalStore, Notifier, RawCompressor, RemoteStore,
    ZfsCli, ZstdCompressor,
};
use crate::config::{BackupConfig, RemoteTarget};
use crate::display::{format_config, format_plan, format_report};
use crate::error::BackupResult;
use crate::lock::RunLock;
use crate::models::RunTimestamp;
use crate::orchestrator::{failure_message, BackupRunner, Collaborators, RunFailure, RunStage};

/// Subcommands; running the backup is the default
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Snapshot, upload and rotate backups (default)
    Run,

    /// Show what a run would upload and delete without changing anything
    #[command(alias = "dry-run")]
    Plan,

    /// Show the resolved configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Write the merged settings to a JSON file usable with --config
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
}

/// Concrete collaborators for a configuration
pub struct Adapters {
    storage: ZfsCli,
    compressor: Box<dyn Compressor>,
    remote: Box<dyn RemoteStore>,
    notifier: Option<CommandNotifier>,
}

impl Adapters {
    /// `cancel` lets long-running child processes be killed mid-upload
    pub fn from_config(config: &BackupConfig, cancel: &CancelToken) -> Self {
        let compressor: Box<dyn Compressor> = if config.zstd_level == 0 {
            Box::new(RawCompressor)
        } else {
            Box::new(ZstdCompressor::new(config.zstd_level))
        };

        let remote: Box<dyn RemoteStore> = match &config.remote {
            RemoteTarget::S3 { url } => Box::new(
                AwsCliStore::new(&config.aws_bin, url, config.storage_class.clone())
                    .with_cancel(cancel.clone()),
            ),
            RemoteTarget::Local { path } => Box::new(LocalStore::new(path)),
        };

        Self {
            storage: ZfsCli::new(&config.zfs_bin),
            compressor,
            remote,
            notifier: config.notify_command.as_deref().map(CommandNotifier::new),
        }
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            storage: &self.storage,
            compressor: self.compressor.as_ref(),
            remote: self.remote.as_ref(),
            notifier: self.notifier.as_ref().map(|n| n as &dyn Notifier),
        }
    }
}

/// Resolve the configuration, reporting problems as a validation failure
pub fn resolve(args: &SettingsArgs) -> Result<BackupConfig, RunFailure> {
    args.resolve()
        .map_err(|e| RunFailure::new(RunStage::Validating, e))
}

/// Resolve the configuration for a run
///
/// A configuration that does not validate is still reported to the
/// notification command given in the settings, if any.
pub fn resolve_for_run(args: &SettingsArgs) -> Result<BackupConfig, RunFailure> {
    resolve(args).map_err(|failure| {
        let settings = args
            .merged_settings()
            .unwrap_or_else(|_| args.to_settings());
        if let Some(command) = settings.notify_command.as_deref() {
            let pool = settings.pool.as_deref().unwrap_or("unnamed pool");
            deliver(&CommandNotifier::new(command), pool, &failure);
        }
        failure
    })
}

fn deliver(notifier: &dyn Notifier, pool: &str, failure: &RunFailure) {
    if let Err(e) = notifier.notify(&failure_message(pool, failure)) {
        warn!(error = %e, "Failed to deliver failure notification");
    }
}

/// Run a backup and print its report
pub fn handle_run(config: &BackupConfig, cancel: CancelToken) -> Result<(), RunFailure> {
    let adapters = Adapters::from_config(config, &cancel);

    let _lock = match &config.lock_file {
        Some(path) => match RunLock::acquire(path) {
            Ok(lock) => Some(lock),
            Err(e) => {
                let failure = RunFailure::new(RunStage::Init, e);
                if let Some(notifier) = adapters.collaborators().notifier {
                    deliver(notifier, &config.pool, &failure);
                }
                return Err(failure);
            }
        },
        None => None,
    };

    let runner = BackupRunner::new(config, adapters.collaborators(), cancel);
    let report = runner.run()?;
    print!("{}", format_report(&report));
    Ok(())
}

/// Print the dry-run plan
pub fn handle_plan(config: &BackupConfig) -> Result<(), RunFailure> {
    let cancel = CancelToken::new();
    let adapters = Adapters::from_config(config, &cancel);
    let runner = BackupRunner::new(config, adapters.collaborators(), cancel);
    let plan = runner.plan(&RunTimestamp::now())?;
    print!("{}", format_plan(&plan));
    Ok(())
}

/// Print the resolved configuration, optionally saving the merged settings
pub fn handle_config(args: &SettingsArgs, json: bool, save: Option<&Path>) -> BackupResult<()> {
    let settings = args.merged_settings()?;
    let config = BackupConfig::from_settings(&settings)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", format_config(&config));
    }

    if let Some(path) = save {
        settings.save(path)?;
        println!("Settings written to {}", path.display());
    }
    Ok(())
}
