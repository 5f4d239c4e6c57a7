//! Error types for OustPeer.

use thiserror::Error;

/// Errors from the persistent block store.
///
/// Store failures are logged by callers and never abort a block decision:
/// stopping the traffic takes priority over bookkeeping durability.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read state file: {0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to write state file: {0}")]
    Write(#[source] std::io::Error),

    #[error("Corrupt state file: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Errors from the firewall enforcement backend.
#[derive(Error, Debug)]
pub enum EnforcementError {
    #[error("Failed to execute {command}: {source}")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
}
