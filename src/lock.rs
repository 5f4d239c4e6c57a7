//! File-based locking to prevent concurrent daemon instances.
//!
//! Two instances tailing the same log would double every enforcement call
//! and race each other's expiry timers, so the daemon takes an exclusive
//! advisory lock on startup.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const LOCK_FILE: &str = "/var/run/oustpeer.lock";

/// Holds the exclusive lock for the life of the process.
/// Released automatically when dropped.
pub struct LockGuard {
    _file: File,
}

impl LockGuard {
    /// Acquire the default daemon lock
    pub fn acquire() -> Result<Self> {
        Self::acquire_path(Path::new(LOCK_FILE))
    }

    /// Acquire an exclusive lock on the given path.
    ///
    /// Opens with create+read+write (no truncate) so there is no TOCTOU race
    /// between file creation and lock acquisition.
    pub fn acquire_path(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).ok();
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another instance of OustPeer is already running.\n\
                 If you believe this is an error, remove the lock file: {:?}",
                lock_path
            )
        })?;

        Ok(Self { _file: file })
    }
}
