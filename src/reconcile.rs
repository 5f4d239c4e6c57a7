//! Periodic reconciliation between the block store and the live firewall.
//!
//! Firewall state drifts: hosts reboot, operators flush chains, the firewall
//! subsystem restarts. Each pass re-installs rules for unexpired records that
//! went missing and sweeps records whose expiry passed while nobody was
//! looking (e.g. during downtime). Enforcement entries with no corresponding
//! record are left alone; the daemon only manages rules it created, and
//! presence in its own store is the only marker of that.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::manager::BlockManager;

/// Upper bound for one listing of the enforcement backend. A hung external
/// command must not stall the loop forever.
const LIST_TIMEOUT_SECS: u64 = 30;

/// Run reconciliation forever: once immediately, then on a fixed period.
/// The caller aborts this task on shutdown.
pub async fn run(manager: Arc<BlockManager>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        reconcile_once(&manager).await;
    }
}

/// One reconciliation pass
pub async fn reconcile_once(manager: &Arc<BlockManager>) {
    let listing = timeout(
        Duration::from_secs(LIST_TIMEOUT_SECS),
        manager.backend().list_active(),
    )
    .await;

    let active: HashSet<String> = match listing {
        Ok(Ok(addresses)) => addresses.into_iter().collect(),
        Ok(Err(e)) => {
            error!("Failed to list enforced addresses: {}", e);
            return;
        }
        Err(_) => {
            error!(
                "Listing enforced addresses timed out after {}s",
                LIST_TIMEOUT_SECS
            );
            return;
        }
    };

    let now = Utc::now();
    let mut restored = 0usize;
    let mut swept = 0usize;

    for record in manager.store().list_all() {
        if record.is_expired(now) {
            // Deferred expiry; the armed value matches so the episode ends here
            manager
                .expire_block(&record.address, &record.username, record.expires_at)
                .await;
            swept += 1;
        } else if !active.contains(&record.address) {
            match manager.backend().apply(&record.address).await {
                Ok(()) => {
                    info!(
                        "Restored block for {} (user: {})",
                        record.address, record.username
                    );
                    restored += 1;
                }
                Err(e) => error!("Failed to restore block for {}: {}", record.address, e),
            }
        }
    }

    debug!(
        "Reconciliation pass done: {} restored, {} swept, {} enforced",
        restored,
        swept,
        active.len()
    );
}
