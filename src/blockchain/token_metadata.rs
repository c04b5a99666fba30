//! Token symbol and USD price lookups with an owned TTL cache.
//!
//! Lookups are best effort: a failing source is logged and the alert goes
//! out without the symbol or USD value.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::Instant;

use crate::blockchain::rpc_client::RpcClient;
use crate::blockchain::transfer_detector::normalize_address;
use crate::config::MarketConfig;
use crate::error::FetchError;
use crate::logging::LogContext;
use crate::models::TokenAmount;

/// `symbol()` selector
const SYMBOL_SELECTOR: &str = "0x95d89b41";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub usd_price: Option<f64>,
}

#[async_trait]
pub trait TokenMetadataSource: Send + Sync {
    async fn symbol(&self, token_address: &str) -> Result<Option<String>, FetchError>;

    async fn usd_price(&self, token_address: &str) -> Result<Option<f64>, FetchError>;
}

/// Symbol over `eth_call`, price over a CoinGecko-style HTTP API
pub struct HttpMetadataSource {
    rpc: RpcClient,
    http: Client,
    price_api_url: String,
    platform: String,
    prices_enabled: bool,
}

impl HttpMetadataSource {
    pub fn new(rpc: RpcClient, market: &MarketConfig, timeout_seconds: u64) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            rpc,
            http,
            price_api_url: market.price_api_url.trim_end_matches('/').to_string(),
            platform: market.platform.clone(),
            prices_enabled: market.enabled,
        })
    }
}

#[async_trait]
impl TokenMetadataSource for HttpMetadataSource {
    async fn symbol(&self, token_address: &str) -> Result<Option<String>, FetchError> {
        let result = self.rpc.eth_call(&normalize_address(token_address), SYMBOL_SELECTOR).await?;
        Ok(decode_abi_string(&result))
    }

    async fn usd_price(&self, token_address: &str) -> Result<Option<f64>, FetchError> {
        if !self.prices_enabled {
            return Ok(None);
        }

        let address = normalize_address(token_address);
        let url = format!("{}/simple/token_price/{}", self.price_api_url, self.platform);
        let response = self
            .http
            .get(&url)
            .query(&[("contract_addresses", address.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus { status: status.as_u16() });
        }

        let body: Value = response.json().await?;
        Ok(body.get(&address).and_then(|entry| entry["usd"].as_f64()))
    }
}

/// Decode an ABI-encoded `string`, or a right-padded `bytes32` as some older tokens return
pub fn decode_abi_string(hex_result: &str) -> Option<String> {
    let body = hex_result.strip_prefix("0x").unwrap_or(hex_result);
    let bytes = decode_hex(body)?;

    let raw = if bytes.len() == 32 {
        bytes.into_iter().take_while(|b| *b != 0).collect::<Vec<u8>>()
    } else {
        if bytes.len() < 64 {
            return None;
        }
        let length = usize::from_str_radix(body.get(64..128)?.trim_start_matches('0'), 16).unwrap_or(0);
        bytes.get(64..64 + length)?.to_vec()
    };

    let symbol = String::from_utf8(raw).ok()?;
    let symbol = symbol.trim().to_string();
    if symbol.is_empty() {
        None
    } else {
        Some(symbol)
    }
}

fn decode_hex(body: &str) -> Option<Vec<u8>> {
    if body.len() % 2 != 0 {
        return None;
    }
    (0..body.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(body.get(i..i + 2)?, 16).ok())
        .collect()
}

struct CachedMetadata {
    metadata: TokenMetadata,
    fetched_at: Instant,
}

/// TTL cache in front of a [`TokenMetadataSource`], owned by the poll loop
pub struct TokenMetadataCache {
    source: Box<dyn TokenMetadataSource>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedMetadata>>,
}

impl TokenMetadataCache {
    pub fn new(source: Box<dyn TokenMetadataSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<(TokenMetadata, bool)> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .map(|entry| (entry.metadata.clone(), entry.fetched_at.elapsed() < self.ttl))
    }

    /// Metadata for a token, refreshed from the source once the entry expires
    pub async fn get(&self, token_address: &str) -> TokenMetadata {
        let key = normalize_address(token_address);
        let stale = match self.cached(&key) {
            Some((metadata, true)) => return metadata,
            Some((metadata, false)) => Some(metadata),
            None => None,
        };

        let context = || LogContext::new("token_metadata", "refresh").with_address(&key);

        let symbol = match self.source.symbol(&key).await {
            Ok(symbol) => symbol,
            Err(e) => {
                context().warn(&format!("Symbol lookup failed: {}", e));
                stale.as_ref().and_then(|m| m.symbol.clone())
            }
        };
        let usd_price = match self.source.usd_price(&key).await {
            Ok(price) => price,
            Err(e) => {
                context().warn(&format!("Price lookup failed: {}", e));
                stale.as_ref().and_then(|m| m.usd_price)
            }
        };

        let metadata = TokenMetadata { symbol, usd_price };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                CachedMetadata {
                    metadata: metadata.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        metadata
    }

    pub async fn usd_value(&self, token_address: &str, amount: &TokenAmount) -> Option<f64> {
        self.get(token_address).await.usd_price.map(|price| price * amount.to_f64())
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
