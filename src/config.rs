use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::retry::RetryConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub database: DatabaseConfig,
    pub polling: PollingConfig,
    pub notifications: NotificationConfig,
    pub market: MarketConfig,
    pub logging: LoggingConfig,
}

/// Chain-data provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint; the API key is appended as a path segment
    pub rpc_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    /// Block explorer used for transaction links
    pub explorer_url: String,
    /// Widest block span requested in one `eth_getLogs` call
    pub max_block_range: u64,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file path
    pub path: String,
    pub enable_wal_mode: bool,
    pub busy_timeout_ms: u32,
}

/// Poll loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub poll_interval_seconds: u64,
    /// First block scanned for a watcher with no recorded events
    pub start_block: u64,
    /// Pause between two watchers of the same cycle
    pub watcher_delay_ms: u64,
}

/// Delivery configuration shared by all transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Total attempts per transport, first one included
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub discord_max_embeds: usize,
    pub telegram_api_base: String,
    pub request_timeout_seconds: u64,
    pub email: EmailConfig,
}

/// Outbound email API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub from_address: String,
}

/// USD price lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub enabled: bool,
    pub price_api_url: String,
    /// Price API platform id of the watched chain
    pub platform: String,
    pub cache_ttl_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://eth-mainnet.g.alchemy.com/v2".to_string(),
            api_key: None,
            timeout_seconds: 30,
            explorer_url: "https://etherscan.io".to_string(),
            max_block_range: 2000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "./watcher.db".to_string(),
            enable_wal_mode: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            start_block: 0,
            watcher_delay_ms: 1000,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 1000,
            discord_max_embeds: 10,
            telegram_api_base: "https://api.telegram.org".to_string(),
            request_timeout_seconds: 10,
            email: EmailConfig::default(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            from_address: "alerts@localhost".to_string(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            price_api_url: "https://api.coingecko.com/api/v3".to_string(),
            platform: "ethereum".to_string(),
            cache_ttl_seconds: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables.
    /// Environment variables take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the TOML file named by `CONFIG_FILE` (default `config.toml`)
    pub fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if !Path::new(&config_path).exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|_| ConfigError::FileNotFound(config_path.clone()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Chain
        if let Ok(url) = env::var("RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(key) = env::var("CHAIN_API_KEY") {
            self.chain.api_key = Some(key);
        }
        if let Some(timeout) = env_parse("RPC_TIMEOUT_SECONDS")? {
            self.chain.timeout_seconds = timeout;
        }
        if let Ok(url) = env::var("EXPLORER_URL") {
            self.chain.explorer_url = url;
        }
        if let Some(range) = env_parse("MAX_BLOCK_RANGE")? {
            self.chain.max_block_range = range;
        }

        // Database
        if let Ok(path) = env::var("DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(wal_mode) = env_parse("DATABASE_WAL_MODE")? {
            self.database.enable_wal_mode = wal_mode;
        }

        // Polling
        if let Some(interval) = env_parse("POLL_INTERVAL_SECONDS")? {
            self.polling.poll_interval_seconds = interval;
        }
        if let Some(start_block) = env_parse("START_BLOCK")? {
            self.polling.start_block = start_block;
        }
        if let Some(delay) = env_parse("WATCHER_DELAY_MS")? {
            self.polling.watcher_delay_ms = delay;
        }

        // Notifications
        if let Some(attempts) = env_parse("MAX_DELIVERY_ATTEMPTS")? {
            self.notifications.max_attempts = attempts;
        }
        if let Some(base) = env_parse("BACKOFF_BASE_MS")? {
            self.notifications.backoff_base_ms = base;
        }
        if let Some(max_embeds) = env_parse("DISCORD_MAX_EMBEDS")? {
            self.notifications.discord_max_embeds = max_embeds;
        }
        if let Ok(base) = env::var("TELEGRAM_API_BASE") {
            self.notifications.telegram_api_base = base;
        }
        if let Ok(url) = env::var("EMAIL_API_URL") {
            self.notifications.email.api_url = Some(url);
        }
        if let Ok(key) = env::var("EMAIL_API_KEY") {
            self.notifications.email.api_key = Some(key);
        }
        if let Ok(from) = env::var("EMAIL_FROM") {
            self.notifications.email.from_address = from;
        }

        // Market
        if let Some(enabled) = env_parse("PRICE_LOOKUP_ENABLED")? {
            self.market.enabled = enabled;
        }
        if let Ok(url) = env::var("PRICE_API_URL") {
            self.market.price_api_url = url;
        }

        // Logging
        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(&self.chain.rpc_url) {
            return Err(ConfigError::InvalidUrl(self.chain.rpc_url.clone()));
        }
        if !is_http_url(&self.chain.explorer_url) {
            return Err(ConfigError::InvalidUrl(self.chain.explorer_url.clone()));
        }
        if self.chain.timeout_seconds == 0 || self.chain.timeout_seconds > 300 {
            return Err(invalid("chain.timeout_seconds", self.chain.timeout_seconds));
        }
        if self.chain.max_block_range == 0 || self.chain.max_block_range > 100_000 {
            return Err(invalid("chain.max_block_range", self.chain.max_block_range));
        }

        if self.database.path.trim().is_empty() {
            return Err(invalid("database.path", &self.database.path));
        }

        if self.polling.poll_interval_seconds == 0 || self.polling.poll_interval_seconds > 3600 {
            return Err(invalid("polling.poll_interval_seconds", self.polling.poll_interval_seconds));
        }

        let notifications = &self.notifications;
        if notifications.max_attempts == 0 || notifications.max_attempts > 20 {
            return Err(invalid("notifications.max_attempts", notifications.max_attempts));
        }
        // Discord accepts at most 10 embeds per message
        if notifications.discord_max_embeds == 0 || notifications.discord_max_embeds > 10 {
            return Err(invalid("notifications.discord_max_embeds", notifications.discord_max_embeds));
        }
        if !is_http_url(&notifications.telegram_api_base) {
            return Err(ConfigError::InvalidUrl(notifications.telegram_api_base.clone()));
        }
        if notifications.request_timeout_seconds == 0 {
            return Err(invalid(
                "notifications.request_timeout_seconds",
                notifications.request_timeout_seconds,
            ));
        }
        if let Some(url) = &notifications.email.api_url {
            if !is_http_url(url) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }

        if self.market.enabled && !is_http_url(&self.market.price_api_url) {
            return Err(ConfigError::InvalidUrl(self.market.price_api_url.clone()));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(invalid("logging.level", &self.logging.level));
        }
        self.logging.format.parse::<LogFormat>()?;

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.notifications.max_attempts, self.notifications.backoff_base_ms)
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default()).map_err(|e| ConfigError::Parsing(e.to_string()))
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parsing(e.to_string()))?;
        fs::write(path, content).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.polling.start_block, 0);
        assert_eq!(config.chain.max_block_range, 2000);
        assert_eq!(config.notifications.max_attempts, 5);
        assert_eq!(config.notifications.backoff_base_ms, 1000);
        assert_eq!(config.notifications.discord_max_embeds, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.chain.rpc_url = "invalid-url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        config = AppConfig::default();
        config.polling.poll_interval_seconds = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.notifications.max_attempts = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.notifications.discord_max_embeds = 11;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.notifications.email.api_url = Some("smtp://mail".to_string());
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.chain.max_block_range = 0;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_config_from_notifications() {
        let mut config = AppConfig::default();
        config.notifications.max_attempts = 3;
        config.notifications.backoff_base_ms = 250;
        assert_eq!(config.retry_config(), RetryConfig::new(3, 250));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("RPC_URL", "https://rpc.test/v2");
        env::set_var("CHAIN_API_KEY", "key-123");
        env::set_var("DATABASE_PATH", "/tmp/test.db");
        env::set_var("POLL_INTERVAL_SECONDS", "15");
        env::set_var("START_BLOCK", "19000000");
        env::set_var("MAX_DELIVERY_ATTEMPTS", "3");
        env::set_var("BACKOFF_BASE_MS", "200");
        env::set_var("DISCORD_MAX_EMBEDS", "5");
        env::set_var("EMAIL_API_URL", "https://mail.test/send");
        env::set_var("LOG_LEVEL", "debug");
        env::set_var("MAX_BLOCK_RANGE", "500");

        let mut config = AppConfig::default();
        config.apply_env_overrides().unwrap();

        assert_eq!(config.chain.rpc_url, "https://rpc.test/v2");
        assert_eq!(config.chain.api_key.as_deref(), Some("key-123"));
        assert_eq!(config.database.path, "/tmp/test.db");
        assert_eq!(config.polling.poll_interval_seconds, 15);
        assert_eq!(config.polling.start_block, 19_000_000);
        assert_eq!(config.notifications.max_attempts, 3);
        assert_eq!(config.notifications.backoff_base_ms, 200);
        assert_eq!(config.notifications.discord_max_embeds, 5);
        assert_eq!(config.notifications.email.api_url.as_deref(), Some("https://mail.test/send"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.chain.max_block_range, 500);
        assert!(config.validate().is_ok());

        for key in [
            "RPC_URL",
            "CHAIN_API_KEY",
            "DATABASE_PATH",
            "POLL_INTERVAL_SECONDS",
            "START_BLOCK",
            "MAX_DELIVERY_ATTEMPTS",
            "BACKOFF_BASE_MS",
            "DISCORD_MAX_EMBEDS",
            "EMAIL_API_URL",
            "LOG_LEVEL",
            "MAX_BLOCK_RANGE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_invalid_env_values() {
        env::set_var("START_BLOCK", "genesis");

        let mut config = AppConfig::default();
        let result = config.apply_env_overrides();

        assert!(matches!(result, Err(ConfigError::InvalidValue { ref key, .. }) if key == "START_BLOCK"));

        env::remove_var("START_BLOCK");
    }

    #[test]
    #[serial]
    fn test_config_file_loading() {
        let config_content = r#"
[chain]
rpc_url = "https://custom-rpc.test/v2"
api_key = "abc"
timeout_seconds = 45

[polling]
poll_interval_seconds = 30
start_block = 100

[notifications]
max_attempts = 4
discord_max_embeds = 3

[notifications.email]
api_url = "https://mail.test/send"
from_address = "watcher@example.com"

[logging]
level = "warn"
format = "json"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut temp_file, config_content.as_bytes()).unwrap();
        env::set_var("CONFIG_FILE", temp_file.path().to_str().unwrap());

        let config = AppConfig::load_from_file().unwrap();

        assert_eq!(config.chain.rpc_url, "https://custom-rpc.test/v2");
        assert_eq!(config.chain.api_key.as_deref(), Some("abc"));
        assert_eq!(config.chain.timeout_seconds, 45);
        assert_eq!(config.polling.start_block, 100);
        assert_eq!(config.notifications.max_attempts, 4);
        assert_eq!(config.notifications.discord_max_embeds, 3);
        assert_eq!(config.notifications.email.from_address, "watcher@example.com");
        assert_eq!(config.logging.format, "json");
        // Sections left out fall back to defaults
        assert_eq!(config.database, DatabaseConfig::default());
        assert_eq!(config.notifications.backoff_base_ms, 1000);

        env::remove_var("CONFIG_FILE");
    }

    #[test]
    #[serial]
    fn test_malformed_config_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut temp_file, b"[polling\nstart_block = ").unwrap();
        env::set_var("CONFIG_FILE", temp_file.path().to_str().unwrap());

        assert!(matches!(AppConfig::load_from_file(), Err(ConfigError::Parsing(_))));

        env::remove_var("CONFIG_FILE");
    }

    #[test]
    fn test_generate_sample_config() {
        let sample = AppConfig::generate_sample_config().unwrap();
        for section in ["[chain]", "[database]", "[polling]", "[notifications]", "[market]", "[logging]"] {
            assert!(sample.contains(section), "missing {}", section);
        }
    }

    #[test]
    fn test_save_and_reload() {
        let mut config = AppConfig::default();
        config.polling.start_block = 42;
        config.notifications.email.api_key = Some("secret".to_string());

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        config.save_to_file(path).unwrap();

        let reloaded: AppConfig = toml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(reloaded, config);
    }
}
