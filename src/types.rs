use serde::{Deserialize, Serialize};

/// Service configuration loaded from `~/.contactlink/config.json`.
///
/// Every field has a default, so an absent or empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Database file. Defaults to `~/.contactlink/contacts.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Attempts per request before a lost race is reported as a failure.
    #[serde(default = "default_max_tx_attempts")]
    pub max_tx_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_max_tx_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
            max_tx_attempts: default_max_tx_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}
