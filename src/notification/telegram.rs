use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::{AlertTarget, TransferEvent, TransportConfig, TransportKind};
use crate::notification::format::{format_amount, format_timestamp, format_usd, short_hash, tx_url};
use crate::notification::http::WebhookClient;
use crate::notification::{AlertSeverity, SendError, TransportSender};

/// Characters that must be backslash-escaped in MarkdownV2 text
const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

/// Escape plain text for MarkdownV2
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inside a link target only `)` and `\` need escaping
fn escape_link_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Telegram Bot API sender
pub struct TelegramSender {
    http: WebhookClient,
    api_base: String,
    explorer_url: String,
}

impl TelegramSender {
    pub fn new(http: WebhookClient, api_base: &str, explorer_url: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            explorer_url: explorer_url.to_string(),
        }
    }

    fn render_text(&self, target: &AlertTarget, events: &[TransferEvent], severity: AlertSeverity) -> String {
        let mut text = format!(
            "{} *{}*\n",
            severity.emoji(),
            escape_markdown_v2(&format!("{}: {}", severity.label(), target.name))
        );

        for event in events {
            text.push('\n');
            text.push_str(&format!(
                "*Amount:* {}\n",
                escape_markdown_v2(&format_amount(&event.amount, target.token_symbol.as_deref()))
            ));
            if let Some(usd) = format_usd(event.usd_value) {
                text.push_str(&format!("*USD:* {}\n", escape_markdown_v2(&usd)));
            }
            text.push_str(&format!("*Contract:* `{}`\n", event.token_address));
            text.push_str(&format!("*Block:* {}\n", event.block_number));
            text.push_str(&format!(
                "*Time:* {}\n",
                escape_markdown_v2(&format_timestamp(event.created_at))
            ));
            text.push_str(&format!(
                "*Tx:* [{}]({})\n",
                escape_markdown_v2(&short_hash(&event.transaction_hash)),
                escape_link_url(&tx_url(&self.explorer_url, &event.transaction_hash))
            ));
        }

        text
    }
}

#[async_trait]
impl TransportSender for TelegramSender {
    fn kind(&self) -> TransportKind {
        TransportKind::Telegram
    }

    fn build_payload(
        &self,
        target: &AlertTarget,
        config: &TransportConfig,
        events: &[TransferEvent],
        severity: AlertSeverity,
    ) -> Result<Value, SendError> {
        let chat_id = match config {
            TransportConfig::Telegram { bot_token, chat_id } => {
                if bot_token.trim().is_empty() {
                    return Err(SendError::Rejected("missing bot token".to_string()));
                }
                if chat_id.trim().is_empty() {
                    return Err(SendError::Rejected("missing chat id".to_string()));
                }
                chat_id
            }
            other => return Err(SendError::Rejected(format!("expected telegram config, got {}", other.kind()))),
        };

        let text = self.render_text(target, events, severity);
        if text.trim().is_empty() {
            return Err(SendError::Rejected("empty message text".to_string()));
        }

        Ok(json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "MarkdownV2",
            "disable_web_page_preview": true,
        }))
    }

    async fn send(&self, config: &TransportConfig, payload: &Value) -> Result<(), SendError> {
        let bot_token = match config {
            TransportConfig::Telegram { bot_token, .. } if !bot_token.trim().is_empty() => bot_token,
            _ => return Err(SendError::Rejected("missing bot token".to_string())),
        };
        if payload["text"].as_str().map_or(true, |t| t.trim().is_empty()) {
            return Err(SendError::Rejected("empty message text".to_string()));
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, bot_token);
        let (status, body) = self.http.post_json_raw(&url, payload).await?;

        // The `ok` flag decides, whatever the HTTP status
        match serde_json::from_str::<BotApiResponse>(&body) {
            Ok(response) if response.ok => Ok(()),
            Ok(response) => Err(SendError::Transient(format!(
                "telegram rejected message: {}",
                response.description.unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
            ))),
            Err(_) => Err(SendError::Transient(format!(
                "unreadable telegram response (HTTP {})",
                status.as_u16()
            ))),
        }
    }
}
