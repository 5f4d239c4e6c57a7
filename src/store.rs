//! Persistent block record storage.
//!
//! One JSON file mapping blocked address -> record. The file is rewritten
//! atomically (tempfile + rename) on every mutation so a crash can never
//! leave a partial record behind. The in-memory map is the source of truth
//! between writes; durability failures are surfaced as [`StoreError`] and
//! left to callers, which log and continue (a failed write must not stop a
//! block from taking effect).
//!
//! The store never expires records on its own. Expiry is driven exclusively
//! by the block manager's timers and the reconciliation sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;

/// A single blocked address and the episode it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    /// The blocked network address (the store key)
    pub address: String,
    /// Human-readable owner of the block, carried for notifications/audit
    pub username: String,
    /// When the block was created
    pub blocked_at: DateTime<Utc>,
    /// When the block becomes eligible for removal
    pub expires_at: DateTime<Utc>,
}

impl BlockRecord {
    pub fn new(address: &str, username: &str, duration: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            address: address.to_string(),
            username: username.to_string(),
            blocked_at: now,
            expires_at: now + duration,
        }
    }

    /// Whether the record's expiry time has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable address -> record map
pub struct BlockStore {
    path: PathBuf,
    records: Mutex<HashMap<String, BlockRecord>>,
}

impl BlockStore {
    /// Open the store, loading any persisted records.
    ///
    /// A missing file is an empty store. A corrupt or unreadable file is an
    /// error: starting with silently-forgotten blocks would defeat the
    /// reconciliation pass.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records: HashMap<String, BlockRecord> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(StoreError::Read)?;
            serde_json::from_str(&content).map_err(StoreError::Corrupt)?
        } else {
            HashMap::new()
        };

        debug!("Opened block store at {:?} ({} records)", path, records.len());

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// True iff a record exists for the address
    pub fn exists(&self, address: &str) -> bool {
        self.records.lock().unwrap().contains_key(address)
    }

    /// Insert a record. A no-op if the key is already present: callers check
    /// `exists` under the manager lock first, and an existing record must
    /// never have its expiry silently overwritten.
    pub fn put(&self, record: BlockRecord) -> Result<(), StoreError> {
        {
            let mut records = self.records.lock().unwrap();
            if records.contains_key(&record.address) {
                debug!("Record for {} already present, not overwriting", record.address);
                return Ok(());
            }
            records.insert(record.address.clone(), record);
        }
        self.persist()
    }

    /// Point lookup
    pub fn get(&self, address: &str) -> Option<BlockRecord> {
        self.records.lock().unwrap().get(address).cloned()
    }

    /// Remove a record. Absent keys are logged, not an error: the removal
    /// path may race with a record that was already swept.
    pub fn delete(&self, address: &str) -> Result<(), StoreError> {
        let removed = self.records.lock().unwrap().remove(address).is_some();
        if !removed {
            warn!("Delete for {} found no record", address);
            return Ok(());
        }
        self.persist()
    }

    /// Snapshot of all records, used by the reconciliation pass
    pub fn list_all(&self) -> Vec<BlockRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Write the full map to disk atomically
    fn persist(&self) -> Result<(), StoreError> {
        let content = {
            let records = self.records.lock().unwrap();
            serde_json::to_string_pretty(&*records).map_err(StoreError::Corrupt)?
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::Write)?;
        }

        let parent = self.path.parent().unwrap_or(Path::new("."));
        let mut temp_file = NamedTempFile::new_in(parent).map_err(StoreError::Write)?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(StoreError::Write)?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(StoreError::Write)?;
        temp_file
            .persist(&self.path)
            .map_err(|e| StoreError::Write(e.error))?;

        Ok(())
    }
}
