use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::notification::SendError;

/// Shared HTTP client for webhook-style transports
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(timeout_seconds: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// POST a JSON body and return the status with the raw response text
    pub async fn post_json_raw(&self, url: &str, payload: &Value) -> Result<(StatusCode, String), SendError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SendError::Transient(format!("failed to read response: {}", e)))?;
        Ok((status, body))
    }

    /// POST a JSON body; any non-2xx status is a transient failure
    pub async fn post_json(&self, url: &str, payload: &Value) -> Result<(), SendError> {
        let (status, body) = self.post_json_raw(url, payload).await?;
        check_status(status, &body)
    }
}

pub fn check_status(status: StatusCode, body: &str) -> Result<(), SendError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = body.trim();
    if detail.is_empty() {
        Err(SendError::Transient(format!("HTTP {}", status.as_u16())))
    } else {
        let detail: String = detail.chars().take(200).collect();
        Err(SendError::Transient(format!("HTTP {}: {}", status.as_u16(), detail)))
    }
}
