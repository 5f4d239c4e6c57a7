//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM set a process-wide flag that the long-running tasks
//! (watcher, reconciliation) poll between units of work.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if shutdown has been requested.
#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Request a shutdown (called from signal handlers or tests).
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(test)]
pub fn reset_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::Relaxed);
}

/// Wait for SIGINT or SIGTERM, then set the shutdown flag.
///
/// If the SIGTERM handler cannot be registered (restricted environments,
/// containers), this logs a warning and waits on ctrl_c alone.
pub async fn wait_for_shutdown() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            None
        }
    };

    match sigterm {
        Some(ref mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                _ = term.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT, shutting down");
        }
    }

    request_shutdown();
}
