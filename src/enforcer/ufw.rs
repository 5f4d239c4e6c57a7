//! ufw backend for hosts managed through Uncomplicated Firewall.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{exec_cmd, FirewallBackend};
use crate::error::EnforcementError;

/// ufw backend. Deny rules are inserted at position 1 so they take effect
/// before any broader allow rules.
pub struct UfwBackend;

impl UfwBackend {
    pub fn new() -> Self {
        Self
    }

    async fn rule_exists(&self, address: &str) -> Result<bool, EnforcementError> {
        let output = exec_cmd("ufw", &["status"]).await?;
        Ok(parse_status(&output).iter().any(|a| a == address))
    }
}

impl Default for UfwBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallBackend for UfwBackend {
    async fn apply(&self, address: &str) -> Result<(), EnforcementError> {
        if self.rule_exists(address).await? {
            debug!("ufw deny rule for {} already present", address);
            return Ok(());
        }
        exec_cmd("ufw", &["insert", "1", "deny", "from", address, "to", "any"]).await?;
        debug!("Inserted ufw deny rule for {}", address);
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), EnforcementError> {
        if !self.rule_exists(address).await? {
            warn!("ufw deny rule for {} was already absent", address);
            return Ok(());
        }
        exec_cmd("ufw", &["delete", "deny", "from", address, "to", "any"]).await?;
        debug!("Removed ufw deny rule for {}", address);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>, EnforcementError> {
        let output = exec_cmd("ufw", &["status"]).await?;
        Ok(parse_status(&output))
    }
}

/// Parse `ufw status` output into denied source addresses.
/// Format: "Anywhere                   DENY        203.0.113.5"
fn parse_status(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("DENY"))
        .filter_map(|line| {
            line.split_whitespace()
                .find(|part| part.parse::<std::net::IpAddr>().is_ok())
                .map(|part| part.to_string())
        })
        .collect()
}
