//! End-to-end lifecycle tests against a scripted fake backend.
//!
//! These exercise the public API the way the daemon wires it together:
//! store on disk, block manager, reconciliation, event channel.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use oustpeer::enforcer::FirewallBackend;
use oustpeer::error::EnforcementError;
use oustpeer::manager::BlockManager;
use oustpeer::notify::{BlockEvent, EventKind, EVENT_CHANNEL_CAPACITY};
use oustpeer::reconcile;
use oustpeer::store::{BlockRecord, BlockStore};
use tokio::sync::mpsc;

const ADDR: &str = "203.0.113.5";

/// In-memory firewall standing in for iptables/ipset/ufw
#[derive(Default)]
struct FakeFirewall {
    rules: Mutex<Vec<String>>,
    applies: Mutex<usize>,
}

#[async_trait]
impl FirewallBackend for FakeFirewall {
    async fn apply(&self, address: &str) -> Result<(), EnforcementError> {
        *self.applies.lock().unwrap() += 1;
        let mut rules = self.rules.lock().unwrap();
        if !rules.iter().any(|r| r == address) {
            rules.push(address.to_string());
        }
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), EnforcementError> {
        self.rules.lock().unwrap().retain(|r| r != address);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>, EnforcementError> {
        Ok(self.rules.lock().unwrap().clone())
    }
}

fn wiring(
    dir: &tempfile::TempDir,
    duration: Duration,
) -> (
    Arc<BlockManager>,
    Arc<FakeFirewall>,
    mpsc::Receiver<BlockEvent>,
) {
    let store = Arc::new(BlockStore::open(dir.path().join("blocks.json")).unwrap());
    let firewall = Arc::new(FakeFirewall::default());
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let manager = BlockManager::new(store, firewall.clone(), tx, duration);
    (manager, firewall, rx)
}

#[tokio::test(start_paused = true)]
async fn ten_minute_block_episode() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, firewall, mut events) = wiring(&dir, Duration::from_secs(600));

    manager.create_block(ADDR, "alice", None, None).await;

    assert!(manager.is_blocked(ADDR));
    assert_eq!(*firewall.applies.lock().unwrap(), 1);
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Blocked);

    // t+10m: timer fires, rule removed, record gone
    tokio::task::yield_now().await; // let armed timers register their sleep
    tokio::time::advance(Duration::from_secs(601)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(!manager.is_blocked(ADDR));
    assert!(firewall.rules.lock().unwrap().is_empty());
    assert!(manager.store().get(ADDR).is_none());
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Unblocked);
}

#[tokio::test]
async fn rapid_duplicate_reports_enforce_once() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, firewall, _events) = wiring(&dir, Duration::from_secs(600));

    let first = manager.create_block(ADDR, "alice", None, None).await;
    let second = manager.create_block(ADDR, "alice", None, None).await;

    assert_ne!(first, second);
    assert_eq!(*firewall.applies.lock().unwrap(), 1);
}

#[tokio::test]
async fn concurrent_reports_for_same_address_race_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, firewall, _events) = wiring(&dir, Duration::from_secs(600));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let m = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            m.create_block(ADDR, "alice", None, None).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() == oustpeer::manager::BlockOutcome::Created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(*firewall.applies.lock().unwrap(), 1);
    assert_eq!(manager.store().len(), 1);
}

#[tokio::test]
async fn reconciliation_restores_flushed_rules() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, firewall, _events) = wiring(&dir, Duration::from_secs(600));

    manager.create_block(ADDR, "alice", None, None).await;
    manager.create_block("198.51.100.7", "bob", None, None).await;

    // Operator flushes the firewall
    firewall.rules.lock().unwrap().clear();

    reconcile::reconcile_once(&manager).await;

    let rules = firewall.rules.lock().unwrap();
    assert!(rules.contains(&ADDR.to_string()));
    assert!(rules.contains(&"198.51.100.7".to_string()));
}

#[tokio::test(start_paused = true)]
async fn restart_preserves_remaining_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.json");

    // First process life: a record with 2 minutes left
    {
        let store = BlockStore::open(&path).unwrap();
        store
            .put(BlockRecord::new(ADDR, "alice", chrono::Duration::minutes(2)))
            .unwrap();
    }

    // Second process life: fresh memory, persisted store
    let store = Arc::new(BlockStore::open(&path).unwrap());
    let firewall = Arc::new(FakeFirewall::default());
    let (tx, _rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let manager = BlockManager::new(store, firewall.clone(), tx, Duration::from_secs(600));

    manager.restore_timers();
    reconcile::reconcile_once(&manager).await;

    // Reconciliation re-installed the missing rule without touching expiry
    assert!(firewall.rules.lock().unwrap().contains(&ADDR.to_string()));

    // Expires ~2 minutes after restart, not the full 10 minutes later
    tokio::task::yield_now().await; // let armed timers register their sleep
    tokio::time::advance(Duration::from_secs(130)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(!manager.is_blocked(ADDR));
    assert!(firewall.rules.lock().unwrap().is_empty());
}
