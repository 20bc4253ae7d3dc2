//! Centralized bot configuration.
//!
//! Loaded once at startup via the `config` crate from environment
//! variables and passed by value into the components that need it.
//! Nested keys use `__`, e.g. `TELEGRAM__TOKEN` or `DATABASE__URL`.

use serde::Deserialize;
use std::time::Duration;

/// Bot configuration composed from its parts.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Telegram Bot API settings.
    pub telegram: TelegramConfig,

    /// PostgreSQL settings. Without them the bot keeps state in memory.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Capacity of the best-effort notification queue.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Log outbound messages instead of calling the Bot API.
    #[serde(default)]
    pub dry_run: bool,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather.
    pub token: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Long-poll timeout passed to `getUpdates`.
    #[serde(default = "default_poll_timeout_seconds")]
    pub poll_timeout_seconds: u64,

    /// Timeout of a single HTTP request. Must exceed the poll timeout.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

/// PostgreSQL settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_seconds() -> u64 {
    30
}

fn default_request_timeout_seconds() -> u64 {
    40
}

fn default_max_connections() -> u32 {
    5
}

impl TelegramConfig {
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_seconds)
    }

    /// Request timeout, raised above the poll timeout if configured lower.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_seconds
                .max(self.poll_timeout_seconds + 5),
        )
    }
}

impl BotConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Loads configuration from a single source.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::default()
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn token_alone_gets_defaults() {
        let config = BotConfig::from_source(env(&[("TELEGRAM__TOKEN", "123:abc")]))
            .expect("config");

        assert_eq!(config.telegram.token, "123:abc");
        assert_eq!(config.telegram.api_url, "https://api.telegram.org");
        assert_eq!(config.telegram.poll_timeout_seconds, 30);
        assert!(config.database.is_none());
        assert_eq!(config.outbox_capacity, 256);
        assert!(!config.dry_run);
    }

    #[test]
    fn database_section_is_parsed() {
        let config = BotConfig::from_source(env(&[
            ("TELEGRAM__TOKEN", "t"),
            ("DATABASE__URL", "postgres://localhost/poker"),
            ("DATABASE__MAX_CONNECTIONS", "9"),
            ("DRY_RUN", "true"),
        ]))
        .expect("config");

        let database = config.database.expect("database");
        assert_eq!(database.url, "postgres://localhost/poker");
        assert_eq!(database.max_connections, 9);
        assert!(config.dry_run);
    }

    #[test]
    fn missing_token_is_rejected() {
        assert!(BotConfig::from_source(env(&[])).is_err());
    }

    #[test]
    fn request_timeout_outlasts_poll() {
        let telegram = TelegramConfig {
            token: "t".to_string(),
            api_url: default_api_url(),
            poll_timeout_seconds: 50,
            request_timeout_seconds: 10,
        };
        assert_eq!(telegram.request_timeout(), Duration::from_secs(55));
    }
}
