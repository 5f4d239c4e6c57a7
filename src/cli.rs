//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "oustpeer")]
#[command(author, version, about = "Log-driven P2P abuse blocker for Linux gateways")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "/etc/oustpeer/config.yaml", global = true)]
    pub config: PathBuf,

    /// Quiet mode (for systemd)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the blocking daemon (watch log, enforce, reconcile)
    Run,

    /// Check whether an IP is currently blocked
    Check {
        /// IP address to check
        ip: String,
    },

    /// Show active blocks and firewall state
    Status,

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show version
    Version,
}
