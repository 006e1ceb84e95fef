//! Application configuration loaded from environment variables.

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Upper bound on pooled SQLite connections
    pub max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the interest scheduler checks for due courses
    pub poll_interval_secs: u64,
    /// Endpoint that receives notifications; notifications are only logged when unset
    pub notify_webhook_url: Option<String>,
    /// Request timeout for notification delivery
    pub notify_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./makerbank.db".to_string()),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", "5")?,
            api_port: parse_var("API_PORT", "3002")?,
            poll_interval_secs: parse_var("INTEREST_POLL_INTERVAL_SECS", "300")?,
            notify_webhook_url: env_var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            notify_timeout_secs: parse_var("NOTIFY_TIMEOUT_SECS", "10")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Both intervals must be at least one second.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(LedgerError::Config(
                "INTEREST_POLL_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.notify_timeout_secs == 0 {
            return Err(LedgerError::Config(
                "NOTIFY_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LedgerError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| LedgerError::Config(format!("Invalid {key}")))
}
