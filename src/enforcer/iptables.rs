//! iptables backend: one DROP rule per blocked address in the INPUT chain.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{exec_cmd, FirewallBackend};
use crate::error::EnforcementError;

/// Plain iptables backend.
///
/// Scales linearly with the number of blocked addresses; fine for the tens of
/// simultaneous blocks this daemon produces. Use the ipset backend on hosts
/// with heavier churn.
pub struct IptablesBackend;

impl IptablesBackend {
    pub fn new() -> Self {
        Self
    }

    /// Whether a DROP rule for the address is already installed
    async fn rule_exists(&self, address: &str) -> bool {
        exec_cmd("iptables", &["-C", "INPUT", "-s", address, "-j", "DROP"])
            .await
            .is_ok()
    }
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirewallBackend for IptablesBackend {
    async fn apply(&self, address: &str) -> Result<(), EnforcementError> {
        // -C then -I keeps apply idempotent
        if self.rule_exists(address).await {
            debug!("iptables rule for {} already present", address);
            return Ok(());
        }
        exec_cmd("iptables", &["-I", "INPUT", "-s", address, "-j", "DROP"]).await?;
        debug!("Inserted iptables DROP rule for {}", address);
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<(), EnforcementError> {
        if !self.rule_exists(address).await {
            warn!("iptables rule for {} was already absent", address);
            return Ok(());
        }
        exec_cmd("iptables", &["-D", "INPUT", "-s", address, "-j", "DROP"]).await?;
        debug!("Removed iptables DROP rule for {}", address);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<String>, EnforcementError> {
        let output = exec_cmd("iptables", &["-L", "INPUT", "-n"]).await?;
        Ok(parse_input_chain(&output))
    }
}

/// Parse `iptables -L INPUT -n` output into the source addresses of DROP rules.
/// Format: "DROP       all  --  203.0.113.5          0.0.0.0/0"
fn parse_input_chain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            if parts.next() != Some("DROP") {
                return None;
            }
            // target, prot, opt, source
            let source = parts.nth(2)?;
            if source == "0.0.0.0/0" || source.parse::<std::net::IpAddr>().is_err() {
                return None;
            }
            Some(source.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input_chain() {
        let output = "\
Chain INPUT (policy ACCEPT)
target     prot opt source               destination
DROP       all  --  203.0.113.5          0.0.0.0/0
DROP       all  --  198.51.100.7         0.0.0.0/0
ACCEPT     tcp  --  192.0.2.1            0.0.0.0/0            tcp dpt:22
";
        let addresses = parse_input_chain(output);
        assert_eq!(addresses, vec!["203.0.113.5", "198.51.100.7"]);
    }

    #[test]
    fn test_parse_input_chain_skips_catch_all() {
        let output = "DROP       all  --  0.0.0.0/0            0.0.0.0/0\n";
        assert!(parse_input_chain(output).is_empty());
    }

    #[test]
    fn test_parse_input_chain_empty() {
        let output = "Chain INPUT (policy ACCEPT)\ntarget     prot opt source               destination\n";
        assert!(parse_input_chain(output).is_empty());
    }
}
