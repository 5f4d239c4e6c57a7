//! # OustPeer - Log-Driven P2P Abuse Blocker for Linux Gateways
//!
//! A daemon that watches an application log stream for a configured violation
//! tag (typically unauthorized torrent/P2P traffic on a VPN gateway), extracts
//! the offending IP and username, and enforces a temporary firewall block
//! against the address.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       OustPeer                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: run, check, status, init                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! │    └── Log file, detection regexes, duration, templates     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Watcher (log tail + regex extraction)                      │
//! │    └── Feeds violations to the block manager                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BlockManager (the core)                                    │
//! │    ├── Persistent block store (JSON, atomic writes)         │
//! │    ├── Expiry timers (remaining-time aware across restarts) │
//! │    └── Reconciliation against live firewall state           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (FirewallBackend trait)                           │
//! │    ├── IptablesBackend                                      │
//! │    ├── IpsetBackend                                         │
//! │    └── UfwBackend                                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Notifier (telegram, webhook)                               │
//! │    └── Block/unblock transition events                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design notes
//!
//! The block manager owns the authoritative record of who is blocked and for
//! how long. Enforcement is best-effort: a failed firewall call never rolls
//! back the record, because the record's existence is what lets the periodic
//! reconciliation pass retry the rule. The reverse asymmetry holds on the way
//! out: a failed rule removal still deletes the record, so a block can never
//! get stuck being re-applied forever.
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`enforcer`] - Firewall backend abstraction (iptables, ipset, ufw)
//! - [`error`] - Typed errors for the store and enforcement seams
//! - [`lock`] - File locking for concurrent execution prevention
//! - [`manager`] - Block lifecycle manager (create, expire, restore)
//! - [`notify`] - Notification sink (telegram, webhook)
//! - [`reconcile`] - Periodic firewall/store reconciliation
//! - [`signal`] - Graceful shutdown signal handling
//! - [`store`] - Persistent block record storage
//! - [`watcher`] - Log file tailing and violation extraction

pub mod cli;
pub mod commands;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod lock;
pub mod manager;
pub mod notify;
pub mod reconcile;
pub mod signal;
pub mod store;
pub mod watcher;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use manager::BlockManager;
