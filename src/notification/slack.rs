use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::{AlertTarget, TransferEvent, TransportConfig, TransportKind};
use crate::notification::format::{format_amount, format_timestamp, format_usd, short_hash, tx_url};
use crate::notification::http::WebhookClient;
use crate::notification::{AlertSeverity, SendError, TransportSender};

/// Slack incoming-webhook sender using Block Kit
pub struct SlackSender {
    http: WebhookClient,
    explorer_url: String,
}

impl SlackSender {
    pub fn new(http: WebhookClient, explorer_url: &str) -> Self {
        Self {
            http,
            explorer_url: explorer_url.to_string(),
        }
    }

    fn event_section(&self, target: &AlertTarget, event: &TransferEvent) -> Value {
        let mut fields = vec![
            json!({ "type": "mrkdwn", "text": format!("*Contract*\n`{}`", event.token_address) }),
            json!({
                "type": "mrkdwn",
                "text": format!("*Amount*\n{}", format_amount(&event.amount, target.token_symbol.as_deref()))
            }),
            json!({ "type": "mrkdwn", "text": format!("*Block*\n{}", event.block_number) }),
            json!({ "type": "mrkdwn", "text": format!("*Timestamp*\n{}", format_timestamp(event.created_at)) }),
            json!({
                "type": "mrkdwn",
                "text": format!(
                    "*Transaction*\n<{}|{}>",
                    tx_url(&self.explorer_url, &event.transaction_hash),
                    short_hash(&event.transaction_hash)
                )
            }),
        ];
        if let Some(usd) = format_usd(event.usd_value) {
            fields.push(json!({ "type": "mrkdwn", "text": format!("*USD value*\n{}", usd) }));
        }

        json!({ "type": "section", "fields": fields })
    }
}

#[async_trait]
impl TransportSender for SlackSender {
    fn kind(&self) -> TransportKind {
        TransportKind::Slack
    }

    fn build_payload(
        &self,
        target: &AlertTarget,
        _config: &TransportConfig,
        events: &[TransferEvent],
        severity: AlertSeverity,
    ) -> Result<Value, SendError> {
        let title = format!("{} {}: {}", severity.emoji(), severity.label(), target.name);

        let mut blocks = vec![
            json!({ "type": "header", "text": { "type": "plain_text", "text": title, "emoji": true } }),
            json!({ "type": "divider" }),
        ];
        blocks.extend(events.iter().map(|event| self.event_section(target, event)));
        blocks.push(json!({ "type": "divider" }));

        Ok(json!({
            // Shown in push notifications and clients without Block Kit
            "text": format!("{} ({} transfer(s))", title, events.len()),
            "blocks": blocks,
        }))
    }

    async fn send(&self, config: &TransportConfig, payload: &Value) -> Result<(), SendError> {
        match config {
            TransportConfig::Slack { webhook_url } => self.http.post_json(webhook_url, payload).await,
            other => Err(SendError::Rejected(format!("expected slack config, got {}", other.kind()))),
        }
    }
}
