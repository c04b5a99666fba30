use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AlertError, DeliveryFailure};
use crate::logging::{ErrorLogger, LogContext};
use crate::models::{AlertTarget, TransferEvent, TransportKind};
use crate::notification::discord::DiscordSender;
use crate::notification::email::{EmailSender, HttpMailer};
use crate::notification::http::WebhookClient;
use crate::notification::slack::SlackSender;
use crate::notification::telegram::TelegramSender;
use crate::notification::{deliver_with_retry, AlertSeverity, TransportSender};
use crate::retry::RetryConfig;

/// Result of delivering to one transport
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOutcome {
    pub transport_id: i64,
    pub channel: TransportKind,
    /// Attempts used on success
    pub result: Result<u32, DeliveryFailure>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub outcomes: Vec<TransportOutcome>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryFailure> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }
}

/// Routes alerts to the sender registered for each transport kind
pub struct NotificationDispatcher {
    senders: HashMap<TransportKind, Arc<dyn TransportSender>>,
    retry: RetryConfig,
}

impl NotificationDispatcher {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            senders: HashMap::new(),
            retry,
        }
    }

    /// Register a sender, replacing any existing one for the same kind
    pub fn with_sender(mut self, sender: Arc<dyn TransportSender>) -> Self {
        self.senders.insert(sender.kind(), sender);
        self
    }

    /// All built-in senders. Email is only available with a mail API configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let notifications = &config.notifications;
        let explorer = &config.chain.explorer_url;
        let http = WebhookClient::new(notifications.request_timeout_seconds)?;

        let mut dispatcher = Self::new(config.retry_config())
            .with_sender(Arc::new(SlackSender::new(http.clone(), explorer)))
            .with_sender(Arc::new(DiscordSender::new(
                http.clone(),
                explorer,
                notifications.discord_max_embeds,
            )))
            .with_sender(Arc::new(TelegramSender::new(http, &notifications.telegram_api_base, explorer)));

        if let Some(api_url) = &notifications.email.api_url {
            let mailer = HttpMailer::new(
                api_url,
                notifications.email.api_key.clone(),
                &notifications.email.from_address,
                notifications.request_timeout_seconds,
            )?;
            dispatcher = dispatcher.with_sender(Arc::new(EmailSender::new(Arc::new(mailer), explorer)));
        } else {
            log::warn!("No email API configured, email transports will fail");
        }

        Ok(dispatcher)
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn supports(&self, kind: TransportKind) -> bool {
        self.senders.contains_key(&kind)
    }

    /// Deliver a batch to every transport of the target.
    ///
    /// Transports are attempted one after another; a failing transport never
    /// prevents the others from being tried.
    pub async fn dispatch(
        &self,
        target: &AlertTarget,
        events: &[TransferEvent],
        severity: AlertSeverity,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for transport in &target.transports {
            let channel = transport.kind();
            let result = match self.senders.get(&channel) {
                Some(sender) => {
                    deliver_with_retry(sender.as_ref(), &self.retry, target, &transport.config, events, severity).await
                }
                None => Err(DeliveryFailure {
                    channel,
                    watcher_id: target.watcher_id,
                    attempts: 0,
                    reason: "no sender registered for channel".to_string(),
                }),
            };

            if let Err(failure) = &result {
                let context = LogContext::new("dispatcher", "dispatch")
                    .with_watcher_id(target.watcher_id)
                    .with_channel(channel)
                    .with_retry_count(failure.attempts)
                    .with_metadata("transport_id", serde_json::json!(transport.id));
                ErrorLogger::log_error(&AlertError::Delivery(failure.clone()), Some(context));
            }

            report.outcomes.push(TransportOutcome {
                transport_id: transport.id,
                channel,
                result,
            });
        }

        report
    }
}
