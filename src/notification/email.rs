use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{AlertTarget, TransferEvent, TransportConfig, TransportKind};
use crate::notification::format::{address_url, format_amount, format_timestamp, format_usd, short_hash, tx_url};
use crate::notification::http::check_status;
use crate::notification::{AlertSeverity, SendError, TransportSender};

/// A rendered message ready for the mail collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound mail collaborator
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError>;
}

/// Mailer backed by a JSON mail API
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: Option<String>, from: &str, timeout_seconds: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
        let body = json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
        });

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("mail request failed: {}", e)))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        check_status(status, &text)
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Email sender: one aggregated table per batch
pub struct EmailSender {
    mailer: Arc<dyn Mailer>,
    explorer_url: String,
}

impl EmailSender {
    pub fn new(mailer: Arc<dyn Mailer>, explorer_url: &str) -> Self {
        Self {
            mailer,
            explorer_url: explorer_url.to_string(),
        }
    }

    fn subject(target: &AlertTarget, events: &[TransferEvent], severity: AlertSeverity) -> String {
        format!("[{}] {}: {} transfer(s)", severity.label(), target.name, events.len())
    }

    fn row(&self, target: &AlertTarget, event: &TransferEvent) -> String {
        let usd = format_usd(event.usd_value).unwrap_or_else(|| "-".to_string());
        format!(
            "<tr><td>{block}</td><td>{time}</td><td><a href=\"{from_url}\">{from}</a></td>\
             <td><a href=\"{to_url}\">{to}</a></td><td>{amount}</td><td>{usd}</td>\
             <td><a href=\"{tx_url}\">{tx}</a></td></tr>",
            block = event.block_number,
            time = escape_html(&format_timestamp(event.created_at)),
            from_url = escape_html(&address_url(&self.explorer_url, &event.from_address)),
            from = escape_html(&short_hash(&event.from_address)),
            to_url = escape_html(&address_url(&self.explorer_url, &event.to_address)),
            to = escape_html(&short_hash(&event.to_address)),
            amount = escape_html(&format_amount(&event.amount, target.token_symbol.as_deref())),
            usd = escape_html(&usd),
            tx_url = escape_html(&tx_url(&self.explorer_url, &event.transaction_hash)),
            tx = escape_html(&short_hash(&event.transaction_hash)),
        )
    }

    fn render_html(&self, target: &AlertTarget, events: &[TransferEvent], severity: AlertSeverity) -> String {
        let rows: String = events.iter().map(|event| self.row(target, event)).collect();
        format!(
            "<h2>{title}</h2>\
             <p>Contract: <a href=\"{contract_url}\"><code>{contract}</code></a></p>\
             <table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\
             <thead><tr><th>Block</th><th>Time</th><th>From</th><th>To</th><th>Amount</th><th>USD</th><th>Transaction</th></tr></thead>\
             <tbody>{rows}</tbody></table>",
            title = escape_html(&format!("{}: {}", severity.label(), target.name)),
            contract_url = escape_html(&address_url(&self.explorer_url, &target.token_address)),
            contract = escape_html(&target.token_address),
            rows = rows,
        )
    }
}

#[async_trait]
impl TransportSender for EmailSender {
    fn kind(&self) -> TransportKind {
        TransportKind::Email
    }

    fn build_payload(
        &self,
        target: &AlertTarget,
        config: &TransportConfig,
        events: &[TransferEvent],
        severity: AlertSeverity,
    ) -> Result<Value, SendError> {
        let to = match config {
            TransportConfig::Email { address } => address.clone(),
            other => return Err(SendError::Rejected(format!("expected email config, got {}", other.kind()))),
        };

        let message = EmailMessage {
            to,
            subject: Self::subject(target, events, severity),
            html: self.render_html(target, events, severity),
        };
        serde_json::to_value(&message).map_err(|e| SendError::Rejected(format!("unserializable message: {}", e)))
    }

    async fn send(&self, _config: &TransportConfig, payload: &Value) -> Result<(), SendError> {
        let message: EmailMessage = serde_json::from_value(payload.clone())
            .map_err(|e| SendError::Rejected(format!("malformed email payload: {}", e)))?;
        self.mailer.send(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::test_support::event;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn config() -> TransportConfig {
        TransportConfig::Email {
            address: "ops@example.com".to_string(),
        }
    }

    fn target() -> AlertTarget {
        AlertTarget::synthetic("DAI <treasury>", "0x6b175474e89094c44da98b954eedeac495271d0f", vec![config()])
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>&\"'"), "&lt;b&gt;&amp;&quot;&#39;");
    }

    #[test]
    fn test_aggregated_table() {
        let sender = EmailSender::new(Arc::new(RecordingMailer::default()), "https://etherscan.io");
        let events = vec![event(1, "2", "0xaaa", 100), event(2, "3", "0xbbb", 101), event(3, "4", "0xccc", 102)];

        let payload = sender
            .build_payload(&target(), &config(), &events, AlertSeverity::Standard)
            .unwrap();
        let message: EmailMessage = serde_json::from_value(payload).unwrap();

        assert_eq!(message.to, "ops@example.com");
        assert!(message.subject.contains("3 transfer(s)"));
        assert_eq!(message.html.matches("<tr><td>").count(), 3);
        assert!(message.html.contains("DAI &lt;treasury&gt;"));
        assert!(message.html.contains("https://etherscan.io/tx/0xbbb"));
    }

    #[tokio::test]
    async fn test_send_hands_message_to_mailer() {
        let mailer = Arc::new(RecordingMailer::default());
        let sender = EmailSender::new(mailer.clone(), "https://etherscan.io");
        let payload = sender
            .build_payload(&target(), &config(), &[event(1, "2", "0xaaa", 100)], AlertSeverity::Test)
            .unwrap();

        sender.send(&config(), &payload).await.unwrap();

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.starts_with("[Test notification]"));
    }

    #[tokio::test]
    async fn test_http_mailer_posts_with_bearer_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer secret")
            .match_body(mockito::Matcher::PartialJson(json!({
                "from": "alerts@example.com",
                "to": "ops@example.com",
                "subject": "hello"
            })))
            .with_status(200)
            .with_body(r#"{"id":"1"}"#)
            .create_async()
            .await;
        server.mock("POST", "/down").with_status(503).create_async().await;

        let message = EmailMessage {
            to: "ops@example.com".to_string(),
            subject: "hello".to_string(),
            html: "<p>hi</p>".to_string(),
        };

        let mailer = HttpMailer::new(
            &format!("{}/emails", server.url()),
            Some("secret".to_string()),
            "alerts@example.com",
            5,
        )
        .unwrap();
        mailer.send(&message).await.unwrap();
        mock.assert_async().await;

        let down = HttpMailer::new(&format!("{}/down", server.url()), None, "alerts@example.com", 5).unwrap();
        assert_eq!(
            down.send(&message).await,
            Err(SendError::Transient("HTTP 503".to_string()))
        );
    }
}
