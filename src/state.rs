use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{ContactDb, DbError};
use crate::services::identity::RetryPolicy;
use crate::types::Config;

/// Shared state handed to every request handler.
///
/// Holds no connection: `rusqlite::Connection` is not `Sync`, and each request
/// opens its own so concurrent requests contend at the database, not here.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db_path: PathBuf,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl AppState {
    pub fn new(config: &Config, db_path: PathBuf) -> Self {
        Self {
            db_path,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Open a per-request connection.
    pub fn connect(&self) -> Result<ContactDb, DbError> {
        ContactDb::connect(&self.db_path, self.busy_timeout)
    }
}

/// Resolve the database path from config, falling back to the default location.
pub fn resolve_db_path(config: &Config) -> Result<PathBuf, DbError> {
    match &config.db_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => ContactDb::default_path(),
    }
}

/// Load config from `$CONTACTLINK_CONFIG` or `~/.contactlink/config.json`,
/// then apply `CONTACTLINK_BIND` / `CONTACTLINK_DB` overrides.
pub fn load_config() -> Result<Config, String> {
    let config_path = match std::env::var("CONTACTLINK_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            let home = dirs::home_dir().ok_or("Could not find home directory")?;
            home.join(".contactlink").join("config.json")
        }
    };

    let mut config = load_config_from(&config_path)?;

    if let Ok(bind) = std::env::var("CONTACTLINK_BIND") {
        config.bind_addr = bind;
    }
    if let Ok(db) = std::env::var("CONTACTLINK_DB") {
        config.db_path = Some(db);
    }
    Ok(config)
}

/// Read a config file. A missing file yields defaults; a malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.max_tx_attempts, 5);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "dbPath": "/tmp/c.db", "maxTxAttempts": 9 }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/tmp/c.db"));
        assert_eq!(config.max_tx_attempts, 9);
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert_eq!(resolve_db_path(&config).unwrap(), PathBuf::from("/tmp/c.db"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let config = Config {
            max_tx_attempts: 0,
            ..Config::default()
        };
        assert_eq!(AppState::new(&config, PathBuf::from("x.db")).retry.max_attempts, 1);
    }
}
