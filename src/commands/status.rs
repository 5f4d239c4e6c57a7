//! Status command implementation.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use crate::config::Config;
use crate::enforcer::create_backend;
use crate::store::BlockStore;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let store = BlockStore::open(&config.storage_file)
        .with_context(|| format!("Failed to open block store {:?}", config.storage_file))?;

    println!();
    println!("══════════════════════════════════════════════════════════════════");
    println!(" OUSTPEER STATUS");
    println!("══════════════════════════════════════════════════════════════════");
    println!();
    println!(" Watching: {:?} (tag {:?})", config.log_file, config.violation_tag);
    println!(" Duration: {} minutes", config.block_duration_mins);
    println!(" Backend:  {:?}", config.backend);
    println!();

    let mut records = store.list_all();
    records.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));

    if records.is_empty() {
        println!(" No active blocks.");
    } else {
        let now = Utc::now();
        println!(" ADDRESS            USER               EXPIRES");
        println!(" ────────────────── ────────────────── ──────────────");
        for record in &records {
            let remaining = record.expires_at - now;
            let expires = if remaining > chrono::Duration::zero() {
                format!("in {}m", remaining.num_minutes().max(1))
            } else {
                "expired".to_string()
            };
            println!(
                " {:<18} {:<18} {}",
                record.address, record.username, expires
            );
        }
        println!();
        println!(" {} active block(s)", records.len());
    }
    println!();

    // Live firewall state needs root; degrade gracefully without it
    match create_backend(config.backend) {
        Ok(backend) => match backend.list_active().await {
            Ok(active) => println!(" Enforced addresses: {}", active.len()),
            Err(e) => println!(" Enforced addresses: unavailable ({})", e),
        },
        Err(e) => println!(" Enforced addresses: unavailable ({})", e),
    }

    println!("══════════════════════════════════════════════════════════════════");
    println!();

    Ok(())
}
