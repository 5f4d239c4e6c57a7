//! Run command: the blocking daemon.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::enforcer::{check_root, create_backend, FirewallBackend};
use crate::lock::LockGuard;
use crate::manager::BlockManager;
use crate::notify::{Notifier, EVENT_CHANNEL_CAPACITY};
use crate::reconcile;
use crate::signal;
use crate::store::BlockStore;
use crate::watcher::LogWatcher;

/// Start the daemon: restore persisted blocks, then watch, enforce and
/// reconcile until SIGINT/SIGTERM.
pub async fn run(config_path: &Path) -> Result<()> {
    check_root()?;

    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let _lock = LockGuard::acquire()?;

    // Failure to open the store or find a backend is fatal: the daemon has
    // no purpose without them.
    let store = Arc::new(
        BlockStore::open(&config.storage_file)
            .with_context(|| format!("Failed to open block store {:?}", config.storage_file))?,
    );
    let backend: Arc<dyn FirewallBackend> = Arc::from(create_backend(config.backend)?);

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let manager = BlockManager::new(store, backend, events_tx, config.block_duration());

    let notifier = Notifier::new(
        config.notifications.clone(),
        config.effective_hostname(),
        config.block_duration_mins,
    )?;
    let notifier_task = tokio::spawn(notifier.run(events_rx));

    // Persisted blocks pick up where they left off, with remaining time
    manager.restore_timers();

    // Startup pass runs inside the loop's first tick
    let reconcile_task = tokio::spawn(reconcile::run(
        Arc::clone(&manager),
        config.block_duration(),
    ));

    let watcher = LogWatcher::new(&config, Arc::clone(&manager))?;
    let watcher_task = tokio::spawn(watcher.run());

    info!(
        "OustPeer started (duration {}m, backend {:?})",
        config.block_duration_mins, config.backend
    );

    signal::wait_for_shutdown().await;

    reconcile_task.abort();
    let _ = watcher_task.await;
    notifier_task.abort();

    info!("OustPeer stopped");
    Ok(())
}
