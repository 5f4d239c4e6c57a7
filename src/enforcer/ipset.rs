//! ipset backend: a dedicated set consumed by a single iptables match rule.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{exec_cmd, FirewallBackend};
use crate::error::EnforcementError;

const SET_NAME: &str = "oustpeer";

/// ipset backend (set membership instead of per-IP rules)
pub struct IpsetBackend;

impl IpsetBackend {
    pub fn new() -> Self {
        Self
    }

    /// Make sure the set and the single DROP rule referencing it exist
    async fn ensure_set(&self) -> Result<(), EnforcementError> {
        exec_cmd("ipset", &["create", SET_NAME, "hash:ip", "-exist"]).await?;

        let check = exec_cmd(
            "iptables",
            &[
                "-C", "INPUT", "-m", "set", "--match-set", SET_NAME, "src", "-j", "DROP",
            ],
        )
        .await;
        if check.is_err() {
            exec_cmd(
                "iptables",
                &[
                    "-I", "INPUT", "-m", "set", "--match-set", SET_NAME, "src", "-j", "DROP",
                ],
            )
            .await?;
            debug!("Installed iptables match rule for set {}", SET_NAME);
        }
        Ok(())
    }

    async fn is_member(&self, address: &str) -> bool {
        exec_cmd("ipset", &["test", SET_NAME, address]).await.is_ok()
    }
}

impl Default for IpsetBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallBackend for IpsetBackend {
    async fn apply(&self, address: &str) -> Result<(), EnforcementError> {
        self.ensure_set().await?;
        // -exist makes re-adding a member a no-op
        exec_cmd("ipset", &["add", SET_NAME, address, "-exist"]).await?;
        debug!("Added {} to ipset {}", address, SET_NAME);
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), EnforcementError> {
        if !self.is_member(address).await {
            warn!("{} was already absent from ipset {}", address, SET_NAME);
            return Ok(());
        }
        exec_cmd("ipset", &["del", SET_NAME, address]).await?;
        debug!("Removed {} from ipset {}", address, SET_NAME);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>, EnforcementError> {
        let output = match exec_cmd("ipset", &["list", SET_NAME]).await {
            Ok(output) => output,
            // A never-created set means nothing is enforced yet. Any other
            // failure (permissions, kernel lock) must surface: treating it
            // as an empty set would make reconciliation re-apply everything.
            Err(EnforcementError::CommandFailed { ref stderr, .. })
                if is_missing_set(stderr) =>
            {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        Ok(parse_members(&output))
    }
}

/// ipset reports a missing set as
/// "The set with the given name does not exist"
fn is_missing_set(stderr: &str) -> bool {
    stderr.contains("does not exist")
}

/// Parse `ipset list` output: members follow the "Members:" header
fn parse_members(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("Members:"))
        .skip(1)
        .filter(|line| !line.is_empty())
        .map(|line| line.trim().to_string())
        .collect()
}
