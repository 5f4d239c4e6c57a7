//! Init command: write a default config file.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::config::Config;

pub fn run(force: bool, config_path: &Path) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file {:?} already exists (use --force to overwrite)",
            config_path
        );
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    // Commented template, not a bare serialization
    let content = Config::generate_default_yaml();
    let mut temp_file = tempfile::NamedTempFile::new_in(
        config_path.parent().unwrap_or(Path::new(".")),
    )
    .context("Failed to create temporary file for config")?;
    temp_file.write_all(content.as_bytes())?;
    temp_file
        .persist(config_path)
        .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

    info!("Wrote default config to {:?}", config_path);
    println!("Config written to {:?}. Edit it, then start with: oustpeer run", config_path);
    Ok(())
}
