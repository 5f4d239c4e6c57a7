//! Check command: is an IP currently blocked?

use anyhow::{Context, Result};
use chrono::Utc;
use std::net::IpAddr;
use std::path::Path;

use crate::config::Config;
use crate::store::BlockStore;

pub async fn run(ip: &str, config_path: &Path) -> Result<()> {
    ip.parse::<IpAddr>()
        .with_context(|| format!("Invalid IP address: {}", ip))?;

    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let store = BlockStore::open(&config.storage_file)
        .with_context(|| format!("Failed to open block store {:?}", config.storage_file))?;

    match store.get(ip) {
        Some(record) => {
            let remaining = record.expires_at - Utc::now();
            println!("{} is BLOCKED", ip);
            println!("  user:       {}", record.username);
            println!("  since:      {}", record.blocked_at.to_rfc3339());
            println!("  expires:    {}", record.expires_at.to_rfc3339());
            if remaining > chrono::Duration::zero() {
                println!("  remaining:  {}m", remaining.num_minutes().max(1));
            } else {
                println!("  remaining:  expired, pending sweep");
            }
        }
        None => {
            println!("{} is not blocked", ip);
        }
    }

    Ok(())
}
