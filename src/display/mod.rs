//! Display formatting for terminal output
//!
//! Plain-text renderings of plans, run reports and the resolved
//! configuration.

pub mod config;
pub mod run;

pub use config::format_config;
pub use run::{format_bytes, format_plan, format_report};
