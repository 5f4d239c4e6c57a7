//! Block lifecycle manager: the authoritative record of who is blocked,
//! since when, and until when.
//!
//! Three concurrent callers drive this type: the log watcher (block
//! requests), per-address expiry timers, and the reconciliation loop. All
//! read-check-then-write sequences against the store run under a single
//! async mutex; expected contention is one short hold per qualifying log
//! line, so a global lock beats the bookkeeping cost of per-address locks.
//! Firewall calls are blocking I/O and always happen outside the lock: a
//! brief window where the record exists but the rule has not landed yet is
//! fine, because the record is what suppresses duplicate attempts and what
//! the reconciliation pass retries from.
//!
//! Expiry timers are not cancellable. Instead, the `expires_at` a timer was
//! armed with acts as an episode token: at fire time the timer only acts if
//! the stored record still carries exactly that expiry. A record that was
//! removed and re-created in the interim fails the comparison and the stale
//! firing is a logged no-op.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::enforcer::FirewallBackend;
use crate::notify::{BlockEvent, EventKind};
use crate::store::{BlockRecord, BlockStore};

/// A qualifying log line, already validated by the watcher
#[derive(Debug, Clone)]
pub struct Violation {
    /// Offending source address (the block key)
    pub address: String,
    /// Owner of the offending session
    pub username: String,
    /// Destination address, carried into notifications only
    pub dest_address: Option<String>,
    /// Telegram chat id of the offender, for direct notification
    pub telegram_id: Option<String>,
}

/// Result of a block request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// A new block episode was started
    Created,
    /// The address already has an active record; nothing was done
    AlreadyBlocked,
}

pub struct BlockManager {
    store: Arc<BlockStore>,
    backend: Arc<dyn FirewallBackend>,
    events: mpsc::Sender<BlockEvent>,
    duration: chrono::Duration,
    /// Guards every exists -> put and get -> delete sequence
    gate: Mutex<()>,
}

impl BlockManager {
    pub fn new(
        store: Arc<BlockStore>,
        backend: Arc<dyn FirewallBackend>,
        events: mpsc::Sender<BlockEvent>,
        duration: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            events,
            duration: chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
            gate: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn FirewallBackend> {
        &self.backend
    }

    /// Entry point for the log watcher
    pub async fn report_violation(self: &Arc<Self>, violation: Violation) -> BlockOutcome {
        self.create_block(
            &violation.address,
            &violation.username,
            violation.dest_address,
            violation.telegram_id,
        )
        .await
    }

    /// Start a block episode for the address, unless one is already active.
    ///
    /// Store persistence failures are logged and do not stop the block: the
    /// in-memory record and the firewall rule still land. Likewise a failed
    /// firewall call leaves the record in place so the next reconciliation
    /// pass retries the rule.
    pub async fn create_block(
        self: &Arc<Self>,
        address: &str,
        username: &str,
        dest_address: Option<String>,
        telegram_id: Option<String>,
    ) -> BlockOutcome {
        let record = {
            let _guard = self.gate.lock().await;
            if self.store.exists(address) {
                debug!("{} ({}) is already blocked, skipping", address, username);
                return BlockOutcome::AlreadyBlocked;
            }
            let record = BlockRecord::new(address, username, self.duration);
            if let Err(e) = self.store.put(record.clone()) {
                error!("Failed to persist block record for {}: {}", address, e);
            }
            record
        };

        if let Err(e) = self.backend.apply(address).await {
            error!(
                "Failed to enforce block for {}: {} (reconciliation will retry)",
                address, e
            );
        }

        info!(
            "Blocked {} ({}) until {}",
            address,
            username,
            record.expires_at.to_rfc3339()
        );

        let mut event = BlockEvent::new(EventKind::Blocked, address, username);
        event.dest_address = dest_address;
        event.telegram_id = telegram_id;
        self.emit(event);

        self.arm_timer(&record);
        BlockOutcome::Created
    }

    /// End the block episode identified by `armed_expiry`.
    ///
    /// Called by expiry timers and by the reconciliation sweep. A missing
    /// record, or a record whose expiry no longer matches, marks this firing
    /// as stale and nothing happens. When the episode does end, the record is
    /// deleted even if rule removal fails: a permanently stuck block that
    /// reconciliation keeps re-applying is worse than a rule that lingers
    /// until the operator notices.
    ///
    /// The record is deleted under the lock but the rule is removed outside
    /// it, so a create for the same address can land in between. That new
    /// episode's rule is re-applied after the removal; see the check below.
    pub async fn expire_block(&self, address: &str, username: &str, armed_expiry: DateTime<Utc>) {
        {
            let _guard = self.gate.lock().await;
            match self.store.get(address) {
                None => {
                    debug!("Expiry for {} found no record, skipping", address);
                    return;
                }
                Some(record) if record.expires_at != armed_expiry => {
                    debug!(
                        "Expiry for {} superseded by a newer episode, skipping",
                        address
                    );
                    return;
                }
                Some(_) => {
                    if let Err(e) = self.store.delete(address) {
                        error!("Failed to delete block record for {}: {}", address, e);
                    }
                }
            }
        }

        if let Err(e) = self.backend.remove(address).await {
            warn!(
                "Failed to remove firewall rule for {}: {} (record deleted anyway)",
                address, e
            );
        }

        // A new episode may have started for this address while the old rule
        // was being torn down; its record is already in the store but the
        // removal above may have taken its rule with it. Re-apply here
        // instead of leaving the address drifted until the next
        // reconciliation pass. apply is idempotent, so overlapping with the
        // new episode's own call is harmless.
        if self.store.exists(address) {
            if let Err(e) = self.backend.apply(address).await {
                error!(
                    "Failed to re-apply block for {}: {} (reconciliation will retry)",
                    address, e
                );
            }
        }

        info!("Unblocked {} ({})", address, username);
        self.emit(BlockEvent::new(EventKind::Unblocked, address, username));
    }

    /// Whether the address currently has an active record
    pub fn is_blocked(&self, address: &str) -> bool {
        self.store.exists(address)
    }

    /// Re-arm expiry timers after a restart, using the remaining time of each
    /// persisted record rather than the full duration. Records that expired
    /// while the process was down fire immediately and are swept.
    pub fn restore_timers(self: &Arc<Self>) -> usize {
        let records = self.store.list_all();
        let count = records.len();
        for record in records {
            self.arm_timer(&record);
        }
        if count > 0 {
            info!("Re-armed expiry timers for {} persisted blocks", count);
        }
        count
    }

    /// Spawn the expiry task for a record. Remaining time is measured from
    /// now; an already-passed expiry yields a zero sleep.
    fn arm_timer(self: &Arc<Self>, record: &BlockRecord) {
        let remaining = (record.expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let manager = Arc::clone(self);
        let address = record.address.clone();
        let username = record.username.clone();
        let armed_expiry = record.expires_at;

        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            manager.expire_block(&address, &username, armed_expiry).await;
        });
    }

    /// Hand an event to the notifier without ever blocking the caller
    fn emit(&self, event: BlockEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Dropping lifecycle event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::mock::MockBackend;
    use crate::error::EnforcementError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;

    const ADDR: &str = "203.0.113.5";

    /// Backend whose rule removal parks until released, so a test can put
    /// another call into the teardown window
    struct GatedRemove {
        mock: MockBackend,
        gate: tokio::sync::Notify,
    }

    impl GatedRemove {
        fn new() -> Self {
            Self {
                mock: MockBackend::new(),
                gate: tokio::sync::Notify::new(),
            }
        }
    }

    #[async_trait]
    impl FirewallBackend for GatedRemove {
        async fn apply(&self, address: &str) -> Result<(), EnforcementError> {
            self.mock.apply(address).await
        }

        async fn remove(&self, address: &str) -> Result<(), EnforcementError> {
            self.gate.notified().await;
            self.mock.remove(address).await
        }

        async fn list_active(&self) -> Result<Vec<String>, EnforcementError> {
            self.mock.list_active().await
        }
    }

    struct Fixture {
        manager: Arc<BlockManager>,
        backend: Arc<MockBackend>,
        events: mpsc::Receiver<BlockEvent>,
        _dir: tempfile::TempDir,
    }

    fn fixture(duration: Duration) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(BlockStore::open(dir.path().join("blocks.json")).unwrap());
        let backend = Arc::new(MockBackend::new());
        let (tx, rx) = mpsc::channel(16);
        let manager = BlockManager::new(store, backend.clone(), tx, duration);
        Fixture {
            manager,
            backend,
            events: rx,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_create_block_applies_once() {
        let mut f = fixture(Duration::from_secs(600));

        let outcome = f.manager.create_block(ADDR, "alice", None, None).await;
        assert_eq!(outcome, BlockOutcome::Created);
        assert!(f.manager.is_blocked(ADDR));
        assert_eq!(f.backend.apply_count(ADDR), 1);

        let event = f.events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Blocked);
        assert_eq!(event.address, ADDR);
        assert_eq!(event.username, "alice");
    }

    #[tokio::test]
    async fn test_duplicate_create_is_noop() {
        let f = fixture(Duration::from_secs(600));

        assert_eq!(
            f.manager.create_block(ADDR, "alice", None, None).await,
            BlockOutcome::Created
        );
        assert_eq!(
            f.manager.create_block(ADDR, "alice", None, None).await,
            BlockOutcome::AlreadyBlocked
        );

        // One enforcement call total, and the original expiry is untouched
        assert_eq!(f.backend.apply_count(ADDR), 1);
        assert_eq!(f.manager.store().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_unblocks() {
        let mut f = fixture(Duration::from_secs(600));

        f.manager.create_block(ADDR, "alice", None, None).await;
        assert!(f.manager.is_blocked(ADDR));
        let _ = f.events.recv().await;

        tokio::task::yield_now().await; // let the armed timer register its sleep
        tokio::time::advance(Duration::from_secs(601)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(!f.manager.is_blocked(ADDR));
        assert_eq!(f.backend.remove_count(ADDR), 1);
        assert!(f.manager.store().get(ADDR).is_none());

        let event = f.events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Unblocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_unblocked_before_expiry() {
        let f = fixture(Duration::from_secs(600));

        f.manager.create_block(ADDR, "alice", None, None).await;
        tokio::task::yield_now().await; // let the armed timer register its sleep
        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::task::yield_now().await;

        assert!(f.manager.is_blocked(ADDR));
        assert_eq!(f.backend.remove_count(ADDR), 0);
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_record() {
        let f = fixture(Duration::from_secs(600));
        *f.backend.fail_apply.lock().unwrap() = true;

        let outcome = f.manager.create_block(ADDR, "alice", None, None).await;
        assert_eq!(outcome, BlockOutcome::Created);
        // Bookkeeping proceeds: the record is what reconciliation retries from
        assert!(f.manager.is_blocked(ADDR));
    }

    #[tokio::test]
    async fn test_remove_failure_still_deletes_record() {
        let f = fixture(Duration::from_secs(600));
        f.manager.create_block(ADDR, "alice", None, None).await;
        *f.backend.fail_remove.lock().unwrap() = true;

        let armed = f.manager.store().get(ADDR).unwrap().expires_at;
        f.manager.expire_block(ADDR, "alice", armed).await;

        assert!(!f.manager.is_blocked(ADDR));
    }

    #[tokio::test]
    async fn test_stale_expiry_is_skipped() {
        let f = fixture(Duration::from_secs(600));
        f.manager.create_block(ADDR, "alice", None, None).await;

        // A firing armed for a different episode must not touch the record
        let wrong_expiry = Utc::now() + chrono::Duration::hours(5);
        f.manager.expire_block(ADDR, "alice", wrong_expiry).await;

        assert!(f.manager.is_blocked(ADDR));
        assert_eq!(f.backend.remove_count(ADDR), 0);
    }

    #[tokio::test]
    async fn test_expiry_with_no_record_is_skipped() {
        let f = fixture(Duration::from_secs(600));
        f.manager.expire_block(ADDR, "alice", Utc::now()).await;
        assert_eq!(f.backend.remove_count(ADDR), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_timers_use_remaining_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.json");

        // Simulate a restart: a record with two minutes left, nothing in memory
        {
            let store = BlockStore::open(&path).unwrap();
            store
                .put(BlockRecord::new(ADDR, "alice", chrono::Duration::minutes(2)))
                .unwrap();
        }

        let store = Arc::new(BlockStore::open(&path).unwrap());
        let backend = Arc::new(MockBackend::new());
        let (tx, _rx) = mpsc::channel(16);
        let manager = BlockManager::new(store, backend.clone(), tx, Duration::from_secs(600));

        assert_eq!(manager.restore_timers(), 1);

        // Well before the remaining two minutes: still blocked
        tokio::task::yield_now().await; // let the armed timer register its sleep
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(manager.is_blocked(ADDR));

        // Past the original expiry, far short of the full duration: unblocked
        tokio::time::advance(Duration::from_secs(70)).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!manager.is_blocked(ADDR));
        assert_eq!(backend.remove_count(ADDR), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_timers_sweep_expired_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.json");

        {
            let store = BlockStore::open(&path).unwrap();
            store
                .put(BlockRecord::new(ADDR, "alice", chrono::Duration::minutes(-5)))
                .unwrap();
        }

        let store = Arc::new(BlockStore::open(&path).unwrap());
        let backend = Arc::new(MockBackend::new());
        let (tx, _rx) = mpsc::channel(16);
        let manager = BlockManager::new(store, backend.clone(), tx, Duration::from_secs(600));

        manager.restore_timers();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(!manager.is_blocked(ADDR));
        assert_eq!(backend.remove_count(ADDR), 1);
    }

    #[tokio::test]
    async fn test_create_during_expiry_keeps_new_rule() {
        let dir = tempdir().unwrap();
        let store = Arc::new(BlockStore::open(dir.path().join("blocks.json")).unwrap());
        let backend = Arc::new(GatedRemove::new());
        let (tx, _rx) = mpsc::channel(16);
        let manager = BlockManager::new(store, backend.clone(), tx, Duration::from_secs(600));

        manager.create_block(ADDR, "alice", None, None).await;
        let armed = manager.store().get(ADDR).unwrap().expires_at;

        // Expiry deletes the record, then parks inside the rule removal
        let m = Arc::clone(&manager);
        let expiry = tokio::spawn(async move { m.expire_block(ADDR, "alice", armed).await });
        tokio::task::yield_now().await;
        assert!(!manager.is_blocked(ADDR));

        // A fresh episode starts while the old rule is still being torn down
        assert_eq!(
            manager.create_block(ADDR, "bob", None, None).await,
            BlockOutcome::Created
        );

        backend.gate.notify_one();
        expiry.await.unwrap();

        // The stale removal must not leave the new episode unenforced
        assert!(manager.is_blocked(ADDR));
        assert!(backend
            .mock
            .active
            .lock()
            .unwrap()
            .contains(&ADDR.to_string()));
    }

    #[tokio::test]
    async fn test_event_carries_context() {
        let mut f = fixture(Duration::from_secs(600));
        let violation = Violation {
            address: ADDR.to_string(),
            username: "alice".to_string(),
            dest_address: Some("198.51.100.7".to_string()),
            telegram_id: Some("12345".to_string()),
        };

        assert_eq!(
            f.manager.report_violation(violation).await,
            BlockOutcome::Created
        );

        let event = f.events.recv().await.unwrap();
        assert_eq!(event.dest_address.as_deref(), Some("198.51.100.7"));
        assert_eq!(event.telegram_id.as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn test_full_event_channel_does_not_block() {
        let f = fixture(Duration::from_secs(600));
        // Receiver never drained; fill beyond capacity
        for i in 0..(crate::notify::EVENT_CHANNEL_CAPACITY + 8) {
            let addr = format!("203.0.113.{}", i % 250);
            f.manager
                .create_block(&format!("{}-{}", addr, i), "alice", None, None)
                .await;
        }
        // Reaching here without deadlock is the assertion
    }
}
