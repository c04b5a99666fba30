use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;
use crate::logging::{LogContext, MetricsLogger};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogFilter {
    #[serde(rename = "fromBlock")]
    pub from_block: String,
    #[serde(rename = "toBlock")]
    pub to_block: String,
    pub address: Option<String>,
    pub topics: Option<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct EthLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "logIndex")]
    log_index: String,
}

/// An `eth_getLogs` entry with numeric fields decoded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
}

/// Minimal JSON-RPC client for the chain-data provider
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    timeout_seconds: u64,
}

impl RpcClient {
    pub fn new(endpoint: &str, timeout_seconds: u64) -> Result<Self, FetchError> {
        let context = LogContext::new("rpc_client", "initialization")
            .with_metadata("timeout_seconds", serde_json::json!(timeout_seconds));
        context.info("Initializing RPC client");

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            timeout_seconds,
        })
    }

    /// Build a client for providers that carry the API key as the last path segment
    pub fn with_api_key(endpoint: &str, api_key: Option<&str>, timeout_seconds: u64) -> Result<Self, FetchError> {
        let endpoint = match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => format!("{}/{}", endpoint.trim_end_matches('/'), key),
            None => endpoint.to_string(),
        };
        Self::new(&endpoint, timeout_seconds)
    }

    async fn make_request(&self, method: &str, params: Vec<Value>) -> Result<Value, FetchError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let started = Instant::now();
        let result = self.send(&request).await;
        MetricsLogger::log_rpc_call(method, started.elapsed().as_millis() as u64, result.is_ok());
        result
    }

    async fn send(&self, request: &JsonRpcRequest<'_>) -> Result<Value, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout { seconds: self.timeout_seconds }
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus { status: status.as_u16() });
        }

        let body = response.text().await?;
        let rpc_response: JsonRpcResponse = serde_json::from_str(&body)?;

        if let Some(error) = rpc_response.error {
            return Err(FetchError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| FetchError::InvalidResponse("No result in response".to_string()))
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, FetchError> {
        let result = self.make_request("eth_blockNumber", vec![]).await?;

        let hex_string = result
            .as_str()
            .ok_or_else(|| FetchError::InvalidResponse("Block number is not a string".to_string()))?;

        parse_hex_to_u64(hex_string)
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, FetchError> {
        let params = vec![serde_json::to_value(filter)?];
        let result = self.make_request("eth_getLogs", params).await?;

        let eth_logs: Vec<EthLog> = serde_json::from_value(result)?;

        let mut raw_logs = Vec::with_capacity(eth_logs.len());
        for eth_log in eth_logs {
            raw_logs.push(RawLog {
                block_number: parse_hex_to_u64(&eth_log.block_number)?,
                log_index: parse_hex_to_u32(&eth_log.log_index)?,
                address: eth_log.address,
                topics: eth_log.topics,
                data: eth_log.data,
                transaction_hash: eth_log.transaction_hash,
            });
        }

        LogContext::new("rpc_client", "get_logs")
            .with_metadata("log_count", serde_json::json!(raw_logs.len()))
            .with_metadata("from_block", serde_json::json!(filter.from_block))
            .debug(&format!("Retrieved {} logs", raw_logs.len()));

        Ok(raw_logs)
    }

    /// Read-only contract call against the latest block; returns the raw hex result
    pub async fn eth_call(&self, to: &str, data: &str) -> Result<String, FetchError> {
        let params = vec![serde_json::json!({ "to": to, "data": data }), Value::from("latest")];
        let result = self.make_request("eth_call", params).await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FetchError::InvalidResponse("eth_call result is not a string".to_string()))
    }
}

fn parse_hex_to_u64(hex_str: &str) -> Result<u64, FetchError> {
    let hex_without_prefix = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(hex_without_prefix, 16)
        .map_err(|e| FetchError::InvalidResponse(format!("Failed to parse hex '{}' to u64: {}", hex_str, e)))
}

fn parse_hex_to_u32(hex_str: &str) -> Result<u32, FetchError> {
    let hex_without_prefix = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u32::from_str_radix(hex_without_prefix, 16)
        .map_err(|e| FetchError::InvalidResponse(format!("Failed to parse hex '{}' to u32: {}", hex_str, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_client_creation() {
        let client = RpcClient::new("http://localhost:8545", 30).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8545");
    }

    #[test]
    fn test_api_key_is_appended_to_endpoint() {
        let client = RpcClient::with_api_key("https://eth-mainnet.example.com/v2/", Some("secret"), 10).unwrap();
        assert_eq!(client.endpoint, "https://eth-mainnet.example.com/v2/secret");

        let keyless = RpcClient::with_api_key("https://rpc.example.com", Some("  "), 10).unwrap();
        assert_eq!(keyless.endpoint, "https://rpc.example.com");
    }

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "eth_blockNumber",
            params: vec![],
            id: 1,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#);
    }

    #[test]
    fn test_json_rpc_response_deserialization_error() {
        let json = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"query returned more than 10000 results"}}"#;
        let response: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32005);
    }

    #[test]
    fn test_log_filter_serialization() {
        let filter = LogFilter {
            from_block: "0x65".to_string(),
            to_block: "latest".to_string(),
            address: Some("0xabc".to_string()),
            topics: Some(vec![Some("0xddf2".to_string())]),
        };
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["fromBlock"], "0x65");
        assert_eq!(json["toBlock"], "latest");
        assert_eq!(json["topics"][0], "0xddf2");
    }

    #[test]
    fn test_parse_hex_helpers() {
        assert_eq!(parse_hex_to_u64("0x1234567").unwrap(), 0x1234567);
        assert_eq!(parse_hex_to_u32("0x0").unwrap(), 0);
        assert!(parse_hex_to_u64("0xzz").is_err());
    }
}
