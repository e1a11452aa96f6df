//! CLI command handlers
//!
//! This module bridges clap argument parsing with the backup engine.

pub mod args;
pub mod commands;

pub use args::SettingsArgs;
pub use commands::{
    handle_config, handle_plan, handle_run, resolve, resolve_for_run, Adapters, Commands,
};
