//! Alert delivery to chat webhooks, bots and email.
//!
//! Every channel implements [`TransportSender`]: it builds one payload for a
//! batch of events and sends it. [`deliver_with_retry`] wraps the send in the
//! shared [`RetryManager`] so all channels back off the same way, and the
//! [`dispatcher::NotificationDispatcher`] fans a batch out to every transport
//! of a watcher.

pub mod discord;
pub mod dispatcher;
pub mod email;
pub mod format;
pub mod http;
pub mod slack;
pub mod telegram;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::error::DeliveryFailure;
use crate::logging::MetricsLogger;
use crate::models::{AlertTarget, TokenAmount, TransferEvent, TransportConfig, TransportKind};
use crate::retry::{RetryConfig, RetryManager, Retryable};

pub use dispatcher::{DispatchReport, NotificationDispatcher, TransportOutcome};

/// Amounts at least this many times the threshold are flagged as large
pub const LARGE_TRANSFER_MULTIPLIER: u128 = 10;

/// How prominently an alert is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Standard,
    Large,
    /// Synthetic notification sent to check a transport
    Test,
}

impl AlertSeverity {
    /// `Large` when any event moves at least ten times the threshold
    pub fn classify(events: &[TransferEvent], threshold: &TokenAmount) -> Self {
        let large_bound = match threshold.base_units().checked_mul(LARGE_TRANSFER_MULTIPLIER) {
            Some(units) => TokenAmount::from_base_units(units, threshold.decimals()).ok(),
            None => None,
        };

        let is_large = large_bound.map_or(false, |bound| {
            events.iter().any(|event| {
                TokenAmount::parse_decimal(&event.amount, threshold.decimals())
                    .map(|amount| amount.meets(&bound))
                    .unwrap_or(false)
            })
        });

        if is_large {
            AlertSeverity::Large
        } else {
            AlertSeverity::Standard
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AlertSeverity::Standard => "Large transfer",
            AlertSeverity::Large => "Very large transfer",
            AlertSeverity::Test => "Test notification",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Standard => "\u{1F514}",
            AlertSeverity::Large => "\u{1F6A8}",
            AlertSeverity::Test => "\u{1F9EA}",
        }
    }
}

/// Outcome of a single send attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    /// Worth another attempt: non-2xx, rate limit, network error, Telegram `ok: false`
    #[error("{0}")]
    Transient(String),
    /// The payload or config can never succeed
    #[error("rejected: {0}")]
    Rejected(String),
}

impl Retryable for SendError {
    fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}

/// A notification channel
#[async_trait]
pub trait TransportSender: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Build the channel payload for a non-empty batch of events
    fn build_payload(
        &self,
        target: &AlertTarget,
        config: &TransportConfig,
        events: &[TransferEvent],
        severity: AlertSeverity,
    ) -> Result<Value, SendError>;

    /// One delivery attempt
    async fn send(&self, config: &TransportConfig, payload: &Value) -> Result<(), SendError>;
}

/// Build once, then send with backoff until success, rejection or exhaustion.
///
/// Returns the number of attempts used.
pub async fn deliver_with_retry(
    sender: &dyn TransportSender,
    retry: &RetryConfig,
    target: &AlertTarget,
    config: &TransportConfig,
    events: &[TransferEvent],
    severity: AlertSeverity,
) -> Result<u32, DeliveryFailure> {
    let channel = sender.kind();
    let failure = |attempts: u32, reason: String| DeliveryFailure {
        channel,
        watcher_id: target.watcher_id,
        attempts,
        reason,
    };

    if config.kind() != channel {
        return Err(failure(0, format!("{} config given to {} sender", config.kind(), channel)));
    }
    if events.is_empty() {
        return Err(failure(0, "no events to deliver".to_string()));
    }

    let payload = sender
        .build_payload(target, config, events, severity)
        .map_err(|e| failure(0, e.to_string()))?;

    let manager = RetryManager::new(&format!("{}_delivery", channel), retry.clone());
    match manager.execute(|_| sender.send(config, &payload)).await {
        Ok(((), attempts)) => {
            MetricsLogger::log_delivery(channel, target.watcher_id, events.len(), attempts, true);
            Ok(attempts)
        }
        Err(e) => {
            MetricsLogger::log_delivery(channel, target.watcher_id, events.len(), e.attempts, false);
            Err(failure(e.attempts, e.error.to_string()))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::event;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySender {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TransportSender for FlakySender {
        fn kind(&self) -> TransportKind {
            TransportKind::Slack
        }

        fn build_payload(
            &self,
            _target: &AlertTarget,
            _config: &TransportConfig,
            events: &[TransferEvent],
            _severity: AlertSeverity,
        ) -> Result<Value, SendError> {
            Ok(serde_json::json!({ "count": events.len() }))
        }

        async fn send(&self, _config: &TransportConfig, _payload: &Value) -> Result<(), SendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                Err(SendError::Transient("HTTP 429".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn slack_config() -> TransportConfig {
        TransportConfig::Slack {
            webhook_url: "https://hooks.slack.com/services/T/B/X".to_string(),
        }
    }

    fn target() -> AlertTarget {
        AlertTarget::synthetic("DAI", "0x6b175474e89094c44da98b954eedeac495271d0f", vec![slack_config()])
    }

    #[test]
    fn test_severity_classification() {
        let threshold = TokenAmount::parse_decimal("1.0", 18).unwrap();

        assert_eq!(
            AlertSeverity::classify(&[event(1, "2", "0xa", 1)], &threshold),
            AlertSeverity::Standard
        );
        assert_eq!(
            AlertSeverity::classify(&[event(1, "2", "0xa", 1), event(2, "10", "0xb", 1)], &threshold),
            AlertSeverity::Large
        );
        assert_eq!(
            AlertSeverity::classify(&[event(1, "9.999999", "0xa", 1)], &threshold),
            AlertSeverity::Standard
        );
    }

    #[test]
    fn test_send_error_retryability() {
        assert!(SendError::Transient("HTTP 503".to_string()).is_retryable());
        assert!(!SendError::Rejected("missing chat id".to_string()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_with_retry_recovers() {
        let sender = FlakySender {
            failures_before_success: 3,
            calls: AtomicU32::new(0),
        };
        let attempts = deliver_with_retry(
            &sender,
            &RetryConfig::new(5, 1000),
            &target(),
            &slack_config(),
            &[event(1, "2", "0xabc", 100)],
            AlertSeverity::Standard,
        )
        .await
        .unwrap();
        assert_eq!(attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_with_retry_exhaustion() {
        let sender = FlakySender {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let failure = deliver_with_retry(
            &sender,
            &RetryConfig::new(3, 10),
            &target(),
            &slack_config(),
            &[event(1, "2", "0xabc", 100)],
            AlertSeverity::Standard,
        )
        .await
        .unwrap_err();

        assert_eq!(failure.channel, TransportKind::Slack);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.reason, "HTTP 429");
    }

    #[tokio::test]
    async fn test_deliver_rejects_mismatched_config_and_empty_batch() {
        let sender = FlakySender {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        };
        let email = TransportConfig::Email {
            address: "ops@example.com".to_string(),
        };
        let retry = RetryConfig::default();

        let mismatched = deliver_with_retry(
            &sender,
            &retry,
            &target(),
            &email,
            &[event(1, "2", "0xabc", 100)],
            AlertSeverity::Standard,
        )
        .await;
        assert_eq!(mismatched.unwrap_err().attempts, 0);

        let empty = deliver_with_retry(&sender, &retry, &target(), &slack_config(), &[], AlertSeverity::Standard).await;
        assert_eq!(empty.unwrap_err().attempts, 0);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }
}
