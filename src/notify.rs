//! Notification sink for block/unblock transitions (telegram, webhook).
//!
//! Consumes lifecycle events from a bounded channel and delivers them to the
//! configured destinations. Delivery is best-effort: failures are logged and
//! never reach the block manager, and no ordering is guaranteed relative to
//! the enforcement state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::{NotificationsConfig, SecureString};

/// Timeout for notification HTTP requests
const TIMEOUT_SECS: u64 = 30;

/// Capacity of the lifecycle event channel. A full channel drops events
/// rather than applying backpressure to the block manager.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle transition kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Blocked,
    Unblocked,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Blocked => "block",
            EventKind::Unblocked => "unblock",
        }
    }
}

/// A block/unblock transition emitted by the block manager
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub kind: EventKind,
    pub address: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    /// Destination address from the triggering log line, if it had one
    pub dest_address: Option<String>,
    /// Telegram chat id of the offender, if the log line carried one
    pub telegram_id: Option<String>,
}

impl BlockEvent {
    pub fn new(kind: EventKind, address: &str, username: &str) -> Self {
        Self {
            kind,
            address: address.to_string(),
            username: username.to_string(),
            timestamp: Utc::now(),
            dest_address: None,
            telegram_id: None,
        }
    }
}

/// Notification dispatcher, run as a dedicated task
pub struct Notifier {
    config: NotificationsConfig,
    hostname: String,
    duration_mins: u64,
    client: Client,
}

impl Notifier {
    pub fn new(config: NotificationsConfig, hostname: String, duration_mins: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("oustpeer/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client for notifications")?;

        Ok(Self {
            config,
            hostname,
            duration_mins,
            client,
        })
    }

    /// Consume events until the channel closes
    pub async fn run(self, mut events: mpsc::Receiver<BlockEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(&event).await;
        }
        debug!("Event channel closed, notifier stopping");
    }

    async fn dispatch(&self, event: &BlockEvent) {
        let telegram = &self.config.telegram;

        if telegram.send_admin_message {
            let template = match event.kind {
                EventKind::Blocked => &telegram.admin_block_template,
                EventKind::Unblocked => &telegram.admin_unblock_template,
            };
            let text = self.render(template, event);
            if let Err(e) = self
                .send_telegram(
                    &telegram.admin_chat_id,
                    &text,
                    telegram.get_admin_bot_token(),
                )
                .await
            {
                error!("Admin telegram notification failed: {:#}", e);
            }
        }

        // The offender only gets messaged about the block, not the release
        if telegram.send_user_message && event.kind == EventKind::Blocked {
            if let Some(ref chat_id) = event.telegram_id {
                let text = self.render(&telegram.user_message, event);
                if let Err(e) = self
                    .send_telegram(chat_id, &text, telegram.get_bot_token())
                    .await
                {
                    error!("User telegram notification failed: {:#}", e);
                }
            }
        }

        if self.config.webhook.enabled {
            if let Err(e) = self.send_webhook(event).await {
                error!("Webhook notification failed: {:#}", e);
            }
        }
    }

    /// Substitute event fields into a message or payload template
    fn render(&self, template: &str, event: &BlockEvent) -> String {
        template
            .replace("{username}", &event.username)
            .replace("{ip}", &event.address)
            .replace("{hostname}", &self.hostname)
            .replace("{action}", event.kind.as_str())
            .replace("{timestamp}", &event.timestamp.to_rfc3339())
            .replace("{dst}", event.dest_address.as_deref().unwrap_or(""))
            .replace("{duration}", &self.duration_mins.to_string())
    }

    async fn send_telegram(
        &self,
        chat_id: &str,
        text: &str,
        token: SecureString,
    ) -> Result<()> {
        if token.is_empty() {
            anyhow::bail!("No bot token configured");
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token.as_str());
        let params = [
            ("chat_id", chat_id),
            ("text", text),
            ("parse_mode", "HTML"),
            ("disable_web_page_preview", "true"),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .context("Failed to send telegram request")?;

        if !response.status().is_success() {
            // Never log the response body, it may echo the token URL
            anyhow::bail!("Telegram returned {}", response.status());
        }

        debug!("Telegram message sent to chat {}", chat_id);
        Ok(())
    }

    async fn send_webhook(&self, event: &BlockEvent) -> Result<()> {
        let webhook = &self.config.webhook;
        let body = self.render(&webhook.template, event);

        let mut request = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .body(body);

        if !webhook.header_name.is_empty() {
            request = request.header(
                webhook.header_name.as_str(),
                webhook.header_value.as_str(),
            );
        }

        let response = request.send().await.context("Failed to send webhook")?;

        if !response.status().is_success() {
            warn!("Webhook returned non-success status: {}", response.status());
        }

        debug!("Webhook delivered for {} {}", event.kind.as_str(), event.address);
        Ok(())
    }
}
