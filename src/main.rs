use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use zfs_s3_backup::cancel::{install_signal_handlers, CancelToken};
use zfs_s3_backup::cli::{self, Commands, SettingsArgs};
use zfs_s3_backup::logging;
use zfs_s3_backup::orchestrator::RunFailure;

#[derive(Parser)]
#[command(
    name = "zfs-s3-backup",
    version,
    about = "Snapshot a ZFS pool and stream it, compressed, to S3",
    long_about = "zfs-s3-backup takes a recursive snapshot of a ZFS pool, streams \
                  the pool (or each selected dataset) through zstd into an S3 bucket \
                  or local directory, rotates old backups and always removes the \
                  snapshot it created. Configuration comes from flags, environment \
                  variables or a JSON settings file."
)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match dispatch(&cli) {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(failure)) => {
            report_failure(&failure);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Outer error: the command could not be carried out at all.
/// Inner error: a run or plan failed at a known stage.
fn dispatch(cli: &Cli) -> Result<Result<(), RunFailure>> {
    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = match cli::resolve_for_run(&cli.settings) {
                Ok(config) => config,
                Err(failure) => return Ok(Err(failure)),
            };
            let cancel = CancelToken::new();
            install_signal_handlers(cancel.clone()).context("installing signal handlers")?;
            Ok(cli::handle_run(&config, cancel))
        }
        Commands::Plan => Ok(cli::resolve(&cli.settings).and_then(|config| cli::handle_plan(&config))),
        Commands::Config { json, save } => {
            cli::handle_config(&cli.settings, json, save.as_deref())
                .context("resolving configuration")?;
            Ok(Ok(()))
        }
    }
}

fn report_failure(failure: &RunFailure) {
    eprintln!("backup failed during {}", failure);
}
