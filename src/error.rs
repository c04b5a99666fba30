use thiserror::Error;

use crate::models::TransportKind;

/// Main error type for the transfer watcher
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Delivery failure: {0}")]
    Delivery(#[from] DeliveryFailure),

    #[error("Transport configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while pulling transfer records from the chain-data feed
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC method error: code={code}, message={message}")]
    Rpc { code: i64, message: String },

    #[error("Unexpected HTTP status: {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {seconds} seconds")]
    Timeout { seconds: u64 },
}

/// Event store and watcher registry errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Data integrity violation: {0}")]
    Integrity(String),
}

/// A transport exhausted its retries (or was rejected outright) for one watcher
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{channel} delivery for watcher {watcher_id} failed after {attempts} attempt(s): {reason}")]
pub struct DeliveryFailure {
    pub channel: TransportKind,
    pub watcher_id: i64,
    pub attempts: u32,
    pub reason: String,
}

/// Malformed watcher or transport configuration, rejected before acceptance
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Unknown transport kind: {0}")]
    UnknownKind(String),

    #[error("Transport config for {kind} must be a JSON object")]
    NotAnObject { kind: TransportKind },

    #[error("Transport config for {kind} is missing field '{field}'")]
    MissingField { kind: TransportKind, field: &'static str },

    #[error("Invalid webhook URL for {kind}: {url}")]
    InvalidUrl { kind: TransportKind, url: String },

    #[error("Invalid Telegram bot token")]
    InvalidBotToken,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid token decimals: {0}")]
    InvalidDecimals(u8),
}

/// Application settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parsing failed: {0}")]
    Parsing(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AlertError>;

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Stops the process from doing useful work
    Critical,
    /// Breaks one watcher until someone intervenes
    High,
    /// Transient, expected to clear on the next cycle
    Medium,
    /// Rejected input
    Low,
}

impl AlertError {
    /// Get the severity level of an error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AlertError::Config(_) => ErrorSeverity::Critical,
            AlertError::Persistence(PersistenceError::Integrity(_)) => ErrorSeverity::High,
            AlertError::Persistence(PersistenceError::Sqlite(_)) => ErrorSeverity::High,
            AlertError::Persistence(_) => ErrorSeverity::Medium,
            AlertError::Fetch(_) => ErrorSeverity::Medium,
            AlertError::Delivery(_) => ErrorSeverity::Medium,
            AlertError::Configuration(_) => ErrorSeverity::Low,
        }
    }

    /// Whether the failing watcher is expected to recover on a later cycle
    pub fn is_recoverable(&self) -> bool {
        match self {
            AlertError::Fetch(_) => true,
            AlertError::Delivery(_) => true,
            AlertError::Persistence(PersistenceError::Lock(_)) => true,
            AlertError::Persistence(PersistenceError::Sqlite(_)) => true,
            AlertError::Persistence(_) => false,
            AlertError::Configuration(_) => false,
            AlertError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let critical = AlertError::Config(ConfigError::MissingEnvVar("RPC_URL".to_string()));
        assert_eq!(critical.severity(), ErrorSeverity::Critical);

        let high = AlertError::Persistence(PersistenceError::Integrity("bad row".to_string()));
        assert_eq!(high.severity(), ErrorSeverity::High);

        let medium = AlertError::Fetch(FetchError::Timeout { seconds: 30 });
        assert_eq!(medium.severity(), ErrorSeverity::Medium);

        let low = AlertError::Configuration(ConfigurationError::InvalidBotToken);
        assert_eq!(low.severity(), ErrorSeverity::Low);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(AlertError::Fetch(FetchError::HttpStatus { status: 503 }).is_recoverable());
        assert!(!AlertError::Configuration(ConfigurationError::InvalidEmail("x".to_string())).is_recoverable());
    }

    #[test]
    fn test_delivery_failure_display() {
        let failure = DeliveryFailure {
            channel: TransportKind::Slack,
            watcher_id: 7,
            attempts: 5,
            reason: "HTTP 429".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "slack delivery for watcher 7 failed after 5 attempt(s): HTTP 429"
        );

        let wrapped = AlertError::from(failure);
        assert!(wrapped.to_string().starts_with("Delivery failure: slack delivery"));
    }

    #[test]
    fn test_configuration_error_display() {
        let error = ConfigurationError::MissingField {
            kind: TransportKind::Telegram,
            field: "chat_id",
        };
        assert_eq!(error.to_string(), "Transport config for telegram is missing field 'chat_id'");
    }
}
