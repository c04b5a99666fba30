//! The transfer feed consumed by the poll loop.
//!
//! [`TransferFetcher`] is the narrow contract the core depends on; the
//! [`RpcTransferFetcher`] implementation answers it with `eth_getLogs`.

use async_trait::async_trait;

use crate::blockchain::rpc_client::{LogFilter, RawLog, RpcClient};
use crate::blockchain::transfer_detector::{normalize_address, TransferDetector, TRANSFER_EVENT_SIGNATURE};
use crate::error::FetchError;
use crate::logging::LogContext;
use crate::models::RawTransfer;

/// Source of ERC-20 transfer records for a contract.
#[async_trait]
pub trait TransferFetcher: Send + Sync {
    /// Transfers of `contract_address` from `start_block` (inclusive) to the
    /// chain head, ascending by block. May be empty.
    async fn fetch_transfers(
        &self,
        contract_address: &str,
        start_block: u64,
    ) -> Result<Vec<RawTransfer>, FetchError>;
}

/// JSON-RPC error code providers use for log queries spanning too many blocks or results
const RANGE_TOO_LARGE: i64 = -32005;

pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2000;

/// Scans a contract's Transfer logs with `eth_getLogs`, one bounded block window at a time.
pub struct RpcTransferFetcher {
    client: RpcClient,
    max_block_range: u64,
}

impl RpcTransferFetcher {
    pub fn new(client: RpcClient) -> Self {
        Self {
            client,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
        }
    }

    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.max_block_range = max_block_range.max(1);
        self
    }

    pub fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    pub fn transfer_filter(contract_address: &str, from_block: u64, to_block: u64) -> LogFilter {
        LogFilter {
            from_block: format!("0x{:x}", from_block),
            to_block: format!("0x{:x}", to_block),
            address: Some(normalize_address(contract_address)),
            topics: Some(vec![Some(TRANSFER_EVENT_SIGNATURE.to_string())]),
        }
    }

    fn decode_logs(detector: &TransferDetector, logs: &[RawLog], transfers: &mut Vec<RawTransfer>) {
        for log in logs {
            if !detector.is_token_transfer(log) {
                continue;
            }
            match detector.decode_transfer_log(log) {
                Ok(transfer) => transfers.push(transfer),
                Err(e) => {
                    LogContext::new("transfer_fetcher", "decode")
                        .with_transaction_hash(&log.transaction_hash)
                        .with_block_number(log.block_number)
                        .warn(&format!("Skipping undecodable transfer log: {}", e));
                }
            }
        }
    }
}

#[async_trait]
impl TransferFetcher for RpcTransferFetcher {
    async fn fetch_transfers(
        &self,
        contract_address: &str,
        start_block: u64,
    ) -> Result<Vec<RawTransfer>, FetchError> {
        let head = self.client.get_latest_block_number().await?;
        if start_block > head {
            return Ok(Vec::new());
        }

        let detector = TransferDetector::new(contract_address);
        let mut transfers = Vec::new();
        let mut span = self.max_block_range;
        let mut from_block = start_block;

        loop {
            let to_block = from_block.saturating_add(span - 1).min(head);
            let filter = Self::transfer_filter(contract_address, from_block, to_block);

            match self.client.get_logs(&filter).await {
                Ok(logs) => {
                    Self::decode_logs(&detector, &logs, &mut transfers);
                    if to_block >= head {
                        break;
                    }
                    from_block = to_block + 1;
                }
                Err(FetchError::Rpc { code, message }) if code == RANGE_TOO_LARGE && span > 1 => {
                    span /= 2;
                    LogContext::new("transfer_fetcher", "get_logs")
                        .with_block_number(from_block)
                        .with_metadata("contract_address", serde_json::json!(detector.token_address()))
                        .warn(&format!("Provider rejected block range ({}), narrowing to {} blocks", message, span));
                }
                Err(e) => return Err(e),
            }
        }

        // Providers usually return logs in order, but the cursor relies on it
        transfers.sort_by_key(|t| (t.block_number, t.log_index));
        Ok(transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_filter() {
        let filter = RpcTransferFetcher::transfer_filter("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 101, 2100);
        assert_eq!(filter.from_block, "0x65");
        assert_eq!(filter.to_block, "0x834");
        assert_eq!(
            filter.address.as_deref(),
            Some("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48")
        );
        assert_eq!(filter.topics, Some(vec![Some(TRANSFER_EVENT_SIGNATURE.to_string())]));
    }

    #[test]
    fn test_max_block_range_is_at_least_one() {
        let client = RpcClient::new("http://localhost:8545", 5).unwrap();
        let fetcher = RpcTransferFetcher::new(client).with_max_block_range(0);
        assert_eq!(fetcher.max_block_range(), 1);
    }
}
