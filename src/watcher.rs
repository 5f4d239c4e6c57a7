//! Log file tailing and violation extraction.
//!
//! Follows the configured log file the way `tail -F` does: start at the end,
//! poll for appended data, survive truncation and rotation by tracking the
//! read offset and reopening on every poll. The file is allowed to not exist
//! yet; the watcher waits for it.
//!
//! Lines containing the violation tag are matched against the configured
//! patterns. The first IP in the line is the offending source, the second
//! (if any) the destination. Lines missing the source IP or the username
//! are malformed and dropped with a log, never reaching the block manager.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::{Config, Patterns};
use crate::manager::{BlockManager, BlockOutcome, Violation};
use crate::signal;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct LogWatcher {
    path: PathBuf,
    tag: String,
    patterns: Patterns,
    manager: Arc<BlockManager>,
}

impl LogWatcher {
    pub fn new(config: &Config, manager: Arc<BlockManager>) -> Result<Self> {
        let patterns = config
            .patterns()
            .context("Failed to compile detection patterns")?;
        Ok(Self {
            path: config.log_file.clone(),
            tag: config.violation_tag.clone(),
            patterns,
            manager,
        })
    }

    /// Tail the log until shutdown is requested
    pub async fn run(self) {
        info!("Watching {:?} for tag {:?}", self.path, self.tag);

        // Start at the current end of file; history is not re-punished
        let mut pos = tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let mut partial = String::new();

        loop {
            if signal::is_shutdown_requested() {
                debug!("Shutdown requested, watcher stopping");
                return;
            }

            let len = match tokio::fs::metadata(&self.path).await {
                Ok(meta) => meta.len(),
                Err(_) => {
                    // Not there (yet, or rotated away); wait for it
                    pos = 0;
                    partial.clear();
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            // Truncation or rotation-in-place: restart from the beginning
            if len < pos {
                warn!("{:?} shrank, assuming rotation", self.path);
                pos = 0;
                partial.clear();
            }

            if len > pos {
                match self.read_from(pos).await {
                    Ok((chunk, read)) => {
                        pos += read;
                        partial.push_str(&chunk);
                        while let Some(newline) = partial.find('\n') {
                            let line: String = partial.drain(..=newline).collect();
                            self.handle_line(line.trim_end()).await;
                        }
                    }
                    Err(e) => warn!("Failed reading {:?}: {:#}", self.path, e),
                }
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    /// Read everything after `pos`, returning the text and the byte count to
    /// advance by. Reopening per poll picks up a replaced file as soon as the
    /// offset math sends us back to zero.
    ///
    /// Logs are not guaranteed to be clean UTF-8 (binary garbage, or a poll
    /// that catches the writer mid-multibyte-character), so bytes are read
    /// raw and converted lossily. One bad byte garbles one line instead of
    /// wedging the tail at a fixed offset forever.
    async fn read_from(&self, pos: u64) -> Result<(String, u64)> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        file.seek(SeekFrom::Start(pos)).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        let read = bytes.len() as u64;
        Ok((String::from_utf8_lossy(&bytes).into_owned(), read))
    }

    async fn handle_line(&self, line: &str) {
        if !line.contains(self.tag.as_str()) {
            return;
        }

        let violation = match parse_line(line, &self.patterns) {
            Some(v) => v,
            None => {
                warn!("Invalid log entry format: IP or username missing");
                return;
            }
        };

        match self.manager.report_violation(violation.clone()).await {
            BlockOutcome::Created => {}
            BlockOutcome::AlreadyBlocked => {
                debug!(
                    "{} ({}) is already blocked, skipping",
                    violation.address, violation.username
                );
            }
        }
    }
}

/// Extract a violation from a tagged log line.
/// Returns None when the source address or username cannot be found.
pub fn parse_line(line: &str, patterns: &Patterns) -> Option<Violation> {
    let mut ips = patterns.ip.find_iter(line);
    let address = ips.next()?.as_str().to_string();
    let dest_address = ips.next().map(|m| m.as_str().to_string());

    let username = patterns
        .username
        .captures(line)?
        .get(1)?
        .as_str()
        .to_string();

    let telegram_id = patterns
        .telegram_id
        .as_ref()
        .and_then(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    Some(Violation {
        address,
        username,
        dest_address,
        telegram_id,
    })
}
