use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::{AlertTarget, TransferEvent, TransportConfig, TransportKind};
use crate::notification::format::{format_amount, format_timestamp, format_usd, short_hash, tx_url};
use crate::notification::http::WebhookClient;
use crate::notification::{AlertSeverity, SendError, TransportSender};

/// Discord rejects messages with more embeds than this
pub const DISCORD_EMBED_LIMIT: usize = 10;

pub fn severity_color(severity: AlertSeverity) -> u32 {
    match severity {
        AlertSeverity::Standard => 0xF39C12,
        AlertSeverity::Large => 0xE74C3C,
        AlertSeverity::Test => 0x95A5A6,
    }
}

pub struct DiscordSender {
    http: WebhookClient,
    explorer_url: String,
    max_embeds: usize,
}

impl DiscordSender {
    pub fn new(http: WebhookClient, explorer_url: &str, max_embeds: usize) -> Self {
        Self {
            http,
            explorer_url: explorer_url.to_string(),
            max_embeds: max_embeds.clamp(1, DISCORD_EMBED_LIMIT),
        }
    }

    fn embed(&self, target: &AlertTarget, event: &TransferEvent, severity: AlertSeverity) -> Value {
        let tx_link = tx_url(&self.explorer_url, &event.transaction_hash);
        let mut fields = vec![
            json!({ "name": "Contract", "value": format!("`{}`", event.token_address), "inline": false }),
            json!({
                "name": "Amount",
                "value": format_amount(&event.amount, target.token_symbol.as_deref()),
                "inline": true
            }),
            json!({ "name": "Block", "value": event.block_number.to_string(), "inline": true }),
            json!({ "name": "Timestamp", "value": format_timestamp(event.created_at), "inline": true }),
            json!({
                "name": "Transaction",
                "value": format!("[{}]({})", short_hash(&event.transaction_hash), tx_link),
                "inline": false
            }),
        ];
        if let Some(usd) = format_usd(event.usd_value) {
            fields.push(json!({ "name": "USD value", "value": usd, "inline": true }));
        }

        json!({
            "title": format!("{} {}: {}", severity.emoji(), severity.label(), target.name),
            "url": tx_link,
            "color": severity_color(severity),
            "fields": fields,
        })
    }
}

#[async_trait]
impl TransportSender for DiscordSender {
    fn kind(&self) -> TransportKind {
        TransportKind::Discord
    }

    fn build_payload(
        &self,
        target: &AlertTarget,
        _config: &TransportConfig,
        events: &[TransferEvent],
        severity: AlertSeverity,
    ) -> Result<Value, SendError> {
        let embeds: Vec<Value> = events
            .iter()
            .take(self.max_embeds)
            .map(|event| self.embed(target, event, severity))
            .collect();

        let mut payload = json!({ "embeds": embeds });
        let omitted = events.len().saturating_sub(self.max_embeds);
        if omitted > 0 {
            payload["content"] = json!(format!("{} more transfer(s) not shown", omitted));
        }
        Ok(payload)
    }

    async fn send(&self, config: &TransportConfig, payload: &Value) -> Result<(), SendError> {
        match config {
            TransportConfig::Discord { webhook_url } => self.http.post_json(webhook_url, payload).await,
            other => Err(SendError::Rejected(format!("expected discord config, got {}", other.kind()))),
        }
    }
}
