//! Run cancellation
//!
//! A `CancelToken` is a shared flag polled by the orchestrator between steps
//! and by every transfer stage, including while a stage waits on its
//! neighbour. The binary trips it from SIGINT/SIGTERM via
//! [`install_signal_handlers`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BackupError, BackupResult};

/// Longest a blocked stage or child-process wait goes without looking at
/// the token
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit status used when a second signal forces the process down
pub const FORCED_EXIT_CODE: i32 = 130;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped
    pub fn check(&self, during: &str) -> BackupResult<()> {
        if self.is_cancelled() {
            return Err(BackupError::Cancelled(format!("interrupted during {}", during)));
        }
        Ok(())
    }
}

/// Trip `token` on SIGINT or SIGTERM
///
/// Spawns a background thread driving a single-threaded tokio runtime that
/// waits for either signal. The process keeps running so the orchestrator
/// can unwind and destroy the run snapshot. A second signal exits at once
/// with [`FORCED_EXIT_CODE`], leaving the snapshot behind.
pub fn install_signal_handlers(token: CancelToken) -> BackupResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BackupError::Io(format!("Failed to start signal runtime: {}", e)))?;

    std::thread::Builder::new()
        .name("signal-watch".into())
        .spawn(move || {
            runtime.block_on(async move {
                wait_for_signal().await;
                tracing::warn!("Received termination signal, cancelling run");
                token.cancel();

                wait_for_signal().await;
                tracing::error!("Received second termination signal, exiting without cleanup");
                std::process::exit(FORCED_EXIT_CODE);
            });
        })
        .map_err(|e| BackupError::Io(format!("Failed to spawn signal thread: {}", e)))?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, watching SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
