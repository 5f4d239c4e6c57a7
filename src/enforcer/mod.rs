//! Firewall enforcement backends (iptables, ipset, ufw).

mod iptables;
mod ipset;
mod ufw;

use anyhow::Result;
use async_trait::async_trait;
use std::process::Command;
use std::time::Duration;
use tokio::time::timeout;

pub use iptables::IptablesBackend;
pub use ipset::IpsetBackend;
pub use ufw::UfwBackend;

use crate::config::Backend;
use crate::error::EnforcementError;

/// Upper bound for a single external firewall command. A hung command must
/// not stall the reconciliation loop or an expiry task.
const COMMAND_TIMEOUT_SECS: u64 = 30;

/// Trait for firewall backends.
///
/// `apply` must be idempotent: applying an already-blocked address must not
/// error or install a duplicate rule that breaks removal. `remove` must
/// tolerate an already-absent rule.
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Install a drop rule for the address
    async fn apply(&self, address: &str) -> Result<(), EnforcementError>;

    /// Remove the drop rule for the address
    async fn remove(&self, address: &str) -> Result<(), EnforcementError>;

    /// Addresses currently enforced by this backend, for drift detection
    async fn list_active(&self) -> Result<Vec<String>, EnforcementError>;
}

/// Detect available firewall backend
pub fn detect_backend() -> Result<Backend> {
    // ipset preferred: set membership scales better than per-IP rules
    if Command::new("ipset").arg("version").output().is_ok()
        && Command::new("iptables").arg("--version").output().is_ok()
    {
        return Ok(Backend::Ipset);
    }

    if Command::new("iptables").arg("--version").output().is_ok() {
        return Ok(Backend::Iptables);
    }

    if Command::new("ufw").arg("version").output().is_ok() {
        return Ok(Backend::Ufw);
    }

    anyhow::bail!("No firewall backend available (ipset, iptables or ufw required)")
}

/// Create a firewall backend based on configuration
pub fn create_backend(backend: Backend) -> Result<Box<dyn FirewallBackend>> {
    let actual_backend = match backend {
        Backend::Auto => detect_backend()?,
        other => other,
    };

    match actual_backend {
        Backend::Ipset => Ok(Box::new(IpsetBackend::new())),
        Backend::Iptables => Ok(Box::new(IptablesBackend::new())),
        Backend::Ufw => Ok(Box::new(UfwBackend::new())),
        Backend::Auto => unreachable!(),
    }
}

/// Execute an external command with a bounded timeout and return stdout
pub(crate) async fn exec_cmd(program: &str, args: &[&str]) -> Result<String, EnforcementError> {
    let fut = tokio::process::Command::new(program).args(args).output();

    let output = timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), fut)
        .await
        .map_err(|_| EnforcementError::Timeout {
            command: program.to_string(),
            seconds: COMMAND_TIMEOUT_SECS,
        })?
        .map_err(|e| EnforcementError::Exec {
            command: program.to_string(),
            source: e,
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(EnforcementError::CommandFailed {
            command: program.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Check if running as root (effective UID == 0)
///
/// Firewall manipulation needs CAP_NET_ADMIN; the UID 0 check is simpler and
/// covers the common case of running under systemd or sudo.
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() is a simple syscall that reads the effective user ID.
    // It has no preconditions, never fails, and doesn't modify any state.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        anyhow::bail!(
            "This operation requires root privileges. Please run with sudo,\n\
             or grant the process CAP_NET_ADMIN and CAP_NET_RAW."
        )
    }
    Ok(())
}
