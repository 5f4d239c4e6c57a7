//! Configuration management for OustPeer.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secure string type that zeroizes memory on drop.
/// Used for sensitive data like bot tokens.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log file to watch for violations
    pub log_file: PathBuf,

    /// Substring that marks a qualifying log line (e.g. "TORRENT")
    pub violation_tag: String,

    /// Regex matching IP addresses in a log line.
    /// First match is the offending source, second (if any) the destination.
    pub ip_regex: String,

    /// Regex with one capture group extracting the username
    pub username_regex: String,

    /// Optional regex with one capture group extracting a telegram chat id
    pub telegram_id_regex: Option<String>,

    /// How long an address stays blocked, in minutes
    pub block_duration_mins: u64,

    /// Firewall backend (auto, iptables, ipset, ufw)
    pub backend: Backend,

    /// Where block records are persisted
    pub storage_file: PathBuf,

    /// Hostname shown in notifications (empty = detect at startup)
    pub hostname: String,

    /// Notification destinations
    pub notifications: NotificationsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("/var/log/app/access.log"),
            violation_tag: "TORRENT".to_string(),
            ip_regex: r"(?:\d{1,3}\.){3}\d{1,3}".to_string(),
            username_regex: r"email: (\S+)".to_string(),
            telegram_id_regex: None,
            block_duration_mins: 10,
            backend: Backend::Auto,
            storage_file: PathBuf::from("/var/lib/oustpeer/blocks.json"),
            hostname: String::new(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.block_duration_mins == 0 {
            anyhow::bail!("block_duration_mins must be greater than zero");
        }

        if self.violation_tag.is_empty() {
            anyhow::bail!("violation_tag must not be empty");
        }

        // All patterns must compile up front; the watcher never re-parses them
        Regex::new(&self.ip_regex)
            .with_context(|| format!("Invalid ip_regex: {}", self.ip_regex))?;
        Regex::new(&self.username_regex)
            .with_context(|| format!("Invalid username_regex: {}", self.username_regex))?;
        if let Some(ref pattern) = self.telegram_id_regex {
            Regex::new(pattern)
                .with_context(|| format!("Invalid telegram_id_regex: {}", pattern))?;
        }

        let webhook = &self.notifications.webhook;
        if webhook.enabled {
            if webhook.url.is_empty() {
                anyhow::bail!("Webhook is enabled but no URL is configured");
            }
            if !webhook.url.starts_with("https://") {
                anyhow::bail!("Webhook URL must use HTTPS: {}", webhook.url);
            }
        }

        let telegram = &self.notifications.telegram;
        if telegram.send_admin_message && telegram.admin_chat_id.is_empty() {
            anyhow::bail!("Admin messages are enabled but admin_chat_id is empty");
        }

        Ok(())
    }

    /// Compile the detection patterns
    pub fn patterns(&self) -> Result<Patterns> {
        Ok(Patterns {
            ip: Regex::new(&self.ip_regex)?,
            username: Regex::new(&self.username_regex)?,
            telegram_id: self
                .telegram_id_regex
                .as_deref()
                .map(Regex::new)
                .transpose()?,
        })
    }

    /// Block duration as a std Duration
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.block_duration_mins * 60)
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        let parent_dir = path.parent().unwrap_or(Path::new("/etc/oustpeer"));
        std::fs::create_dir_all(parent_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", parent_dir))?;
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Generate default config with comments
    pub fn generate_default_yaml() -> String {
        include_str!("../templates/config.yaml").to_string()
    }

    /// Hostname for notifications, falling back to the kernel hostname
    pub fn effective_hostname(&self) -> String {
        if !self.hostname.is_empty() {
            return self.hostname.clone();
        }
        std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

/// Compiled detection patterns, built once at startup
#[derive(Debug, Clone)]
pub struct Patterns {
    pub ip: Regex,
    pub username: Regex,
    pub telegram_id: Option<Regex>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Auto-detect backend (checks ipset first, then iptables, then ufw)
    #[default]
    Auto,
    /// Per-IP DROP rules in the INPUT chain
    Iptables,
    /// Dedicated ipset consumed by a single iptables match rule
    Ipset,
    /// Uncomplicated Firewall deny rules
    Ufw,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram: TelegramConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Message the offending user directly (requires telegram_id_regex)
    pub send_user_message: bool,
    /// Message sent to the blocked user
    pub user_message: String,
    /// Token can be set directly or via OUSTPEER_BOT_TOKEN env var.
    /// Memory is securely zeroed when dropped.
    pub bot_token: SecureString,

    /// Notify an admin chat on block/unblock
    pub send_admin_message: bool,
    pub admin_chat_id: String,
    /// Token can be set directly or via OUSTPEER_ADMIN_BOT_TOKEN env var
    pub admin_bot_token: SecureString,
    /// Template placeholders: {username} {ip} {hostname} {duration}
    pub admin_block_template: String,
    pub admin_unblock_template: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            send_user_message: false,
            user_message: "Torrent traffic detected. Your IP {ip} has been blocked on \
                           {hostname} for {duration} minutes."
                .to_string(),
            bot_token: SecureString::default(),
            send_admin_message: false,
            admin_chat_id: String::new(),
            admin_bot_token: SecureString::default(),
            admin_block_template: "User {username} with IP {ip} blocked on {hostname}".to_string(),
            admin_unblock_template: "User {username} with IP {ip} unblocked on {hostname}"
                .to_string(),
        }
    }
}

impl TelegramConfig {
    /// Get the effective user-bot token, checking the env var first.
    /// Returns a SecureString that will be zeroed when dropped.
    pub fn get_bot_token(&self) -> SecureString {
        if let Ok(val) = env::var("OUSTPEER_BOT_TOKEN") {
            return SecureString::new(val);
        }
        self.bot_token.clone()
    }

    /// Get the effective admin-bot token, checking the env var first
    pub fn get_admin_bot_token(&self) -> SecureString {
        if let Ok(val) = env::var("OUSTPEER_ADMIN_BOT_TOKEN") {
            return SecureString::new(val);
        }
        self.admin_bot_token.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    /// JSON body template. Placeholders: {username} {ip} {hostname} {action}
    /// {timestamp} {dst}
    pub template: String,
    /// Optional single custom header (e.g. an auth header)
    pub header_name: String,
    pub header_value: SecureString,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            template: r#"{"username":"{username}","ip":"{ip}","server":"{hostname}","action":"{action}","timestamp":"{timestamp}","dst":"{dst}"}"#
                .to_string(),
            header_name: String::new(),
            header_value: SecureString::default(),
        }
    }
}
