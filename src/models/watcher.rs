use std::fmt;
use std::str::FromStr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ConfigurationError;
use crate::models::amount::{TokenAmount, DEFAULT_DECIMALS, MAX_DECIMALS};

/// Notification channel kinds a watcher can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Slack,
    Discord,
    Telegram,
    Email,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Slack => "slack",
            TransportKind::Discord => "discord",
            TransportKind::Telegram => "telegram",
            TransportKind::Email => "email",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slack" => Ok(TransportKind::Slack),
            "discord" => Ok(TransportKind::Discord),
            "telegram" => Ok(TransportKind::Telegram),
            "email" => Ok(TransportKind::Email),
            other => Err(ConfigurationError::UnknownKind(other.to_string())),
        }
    }
}

/// Channel-specific settings, validated against the kind's schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Slack { webhook_url: String },
    Discord { webhook_url: String },
    Telegram { bot_token: String, chat_id: String },
    Email { address: String },
}

impl TransportConfig {
    /// Validate an opaque JSON payload against the schema of `kind`
    pub fn parse(kind: TransportKind, raw: &Value) -> Result<Self, ConfigurationError> {
        let object = raw
            .as_object()
            .ok_or(ConfigurationError::NotAnObject { kind })?;

        let field = |name: &'static str| -> Result<String, ConfigurationError> {
            let value = match object.get(name) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
            if value.is_empty() {
                return Err(ConfigurationError::MissingField { kind, field: name });
            }
            Ok(value)
        };

        match kind {
            TransportKind::Slack | TransportKind::Discord => {
                let webhook_url = field("webhook_url")?;
                validate_webhook_url(kind, &webhook_url)?;
                Ok(match kind {
                    TransportKind::Slack => TransportConfig::Slack { webhook_url },
                    _ => TransportConfig::Discord { webhook_url },
                })
            }
            TransportKind::Telegram => {
                let bot_token = field("bot_token")?;
                let chat_id = field("chat_id")?;
                validate_bot_token(&bot_token)?;
                Ok(TransportConfig::Telegram { bot_token, chat_id })
            }
            TransportKind::Email => {
                let address = field("address")?;
                validate_email(&address)?;
                Ok(TransportConfig::Email { address })
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Slack { .. } => TransportKind::Slack,
            TransportConfig::Discord { .. } => TransportKind::Discord,
            TransportConfig::Telegram { .. } => TransportKind::Telegram,
            TransportConfig::Email { .. } => TransportKind::Email,
        }
    }

    /// The opaque payload as stored, without the kind tag
    pub fn to_json(&self) -> Value {
        match self {
            TransportConfig::Slack { webhook_url } | TransportConfig::Discord { webhook_url } => {
                json!({ "webhook_url": webhook_url })
            }
            TransportConfig::Telegram { bot_token, chat_id } => {
                json!({ "bot_token": bot_token, "chat_id": chat_id })
            }
            TransportConfig::Email { address } => json!({ "address": address }),
        }
    }
}

fn validate_webhook_url(kind: TransportKind, url: &str) -> Result<(), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidUrl {
        kind,
        url: url.to_string(),
    };
    let parsed = Url::parse(url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(())
}

fn validate_bot_token(token: &str) -> Result<(), ConfigurationError> {
    // <numeric bot id>:<secret>
    match token.split_once(':') {
        Some((id, secret))
            if !id.is_empty()
                && id.chars().all(|c| c.is_ascii_digit())
                && !secret.is_empty()
                && secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
        {
            Ok(())
        }
        _ => Err(ConfigurationError::InvalidBotToken),
    }
}

fn validate_email(address: &str) -> Result<(), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidEmail(address.to_string());
    let (local, domain) = address.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.starts_with('.')
        || domain.ends_with('.')
        || !domain.contains('.')
        || domain.contains('@')
        || address.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }
    Ok(())
}

/// One configured notification channel attached to a watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub id: i64,
    pub watcher_id: i64,
    pub config: TransportConfig,
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        self.config.kind()
    }
}

/// A monitored contract with its volume threshold and transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub token_address: String,
    /// Decimal string in token display units
    pub threshold: String,
    pub decimals: u8,
    pub active: bool,
    pub created_at: i64,
    pub transports: Vec<Transport>,
}

impl Watcher {
    pub fn threshold_amount(&self) -> Result<TokenAmount, ConfigurationError> {
        TokenAmount::parse_decimal(&self.threshold, self.decimals)
            .map_err(|e| ConfigurationError::InvalidThreshold(e.to_string()))
    }
}

/// Input for creating a watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWatcher {
    pub user_id: String,
    pub name: String,
    pub token_address: String,
    pub threshold: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
}

fn default_decimals() -> u8 {
    DEFAULT_DECIMALS
}

impl NewWatcher {
    pub fn new(user_id: &str, name: &str, token_address: &str, threshold: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            token_address: token_address.to_string(),
            threshold: threshold.to_string(),
            decimals: DEFAULT_DECIMALS,
        }
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        crate::blockchain::transfer_detector::validate_address(&self.token_address)
            .map_err(|_| ConfigurationError::InvalidAddress(self.token_address.clone()))?;
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigurationError::InvalidDecimals(self.decimals));
        }
        validate_threshold(&self.threshold, self.decimals)
    }
}

pub fn validate_threshold(threshold: &str, decimals: u8) -> Result<(), ConfigurationError> {
    TokenAmount::parse_decimal(threshold, decimals)
        .map(|_| ())
        .map_err(|e| ConfigurationError::InvalidThreshold(e.to_string()))
}

/// The slice of a watcher that transport senders need.
///
/// Built from a stored watcher for real alerts, or synthesised for test
/// notifications that have no backing record.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTarget {
    pub watcher_id: i64,
    pub name: String,
    pub token_address: String,
    pub token_symbol: Option<String>,
    pub transports: Vec<Transport>,
}

impl AlertTarget {
    pub fn synthetic(name: &str, token_address: &str, transports: Vec<TransportConfig>) -> Self {
        Self {
            watcher_id: 0,
            name: name.to_string(),
            token_address: token_address.to_string(),
            token_symbol: None,
            transports: transports
                .into_iter()
                .enumerate()
                .map(|(i, config)| Transport {
                    id: i as i64,
                    watcher_id: 0,
                    config,
                })
                .collect(),
        }
    }

    pub fn with_symbol(mut self, symbol: Option<String>) -> Self {
        self.token_symbol = symbol;
        self
    }
}

impl From<&Watcher> for AlertTarget {
    fn from(watcher: &Watcher) -> Self {
        Self {
            watcher_id: watcher.id,
            name: watcher.name.clone(),
            token_address: watcher.token_address.clone(),
            token_symbol: None,
            transports: watcher.transports.clone(),
        }
    }
}
