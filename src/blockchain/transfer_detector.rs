use thiserror::Error;

use crate::blockchain::rpc_client::RawLog;
use crate::logging::LogContext;
use crate::models::amount::{parse_raw_units, AmountError};
use crate::models::RawTransfer;

#[derive(Error, Debug, PartialEq)]
pub enum TransferDetectionError {
    #[error("Invalid log format: {0}")]
    InvalidLog(String),
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),
    #[error("Invalid amount format: {0}")]
    InvalidAmount(String),
}

/// ERC-20 Transfer event signature: Transfer(address indexed from, address indexed to, uint256 value)
pub const TRANSFER_EVENT_SIGNATURE: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Recognises and decodes ERC-20 Transfer logs emitted by one token contract
pub struct TransferDetector {
    token_address: String,
}

impl TransferDetector {
    pub fn new(token_address: &str) -> Self {
        Self {
            token_address: normalize_address(token_address),
        }
    }

    pub fn token_address(&self) -> &str {
        &self.token_address
    }

    /// Check if a log is an ERC-20 Transfer emitted by the watched contract
    pub fn is_token_transfer(&self, log: &RawLog) -> bool {
        if normalize_address(&log.address) != self.token_address {
            return false;
        }

        // ERC-721 shares the signature but indexes the token id as a fourth topic
        log.topics.len() == 3 && normalize_address(&log.topics[0]) == TRANSFER_EVENT_SIGNATURE
    }

    /// Decode a Transfer log into a raw transfer record
    pub fn decode_transfer_log(&self, log: &RawLog) -> Result<RawTransfer, TransferDetectionError> {
        if !self.is_token_transfer(log) {
            return Err(TransferDetectionError::InvalidLog(format!(
                "Log {}:{} is not a Transfer from {}",
                log.transaction_hash, log.log_index, self.token_address
            )));
        }

        let from_address = extract_address_from_topic(&log.topics[1])?;
        let to_address = extract_address_from_topic(&log.topics[2])?;
        let raw_amount = extract_amount_from_data(&log.data)?;

        Ok(RawTransfer {
            block_number: log.block_number,
            log_index: log.log_index,
            raw_amount,
            transaction_hash: log.transaction_hash.to_lowercase(),
            from_address,
            to_address,
        })
    }
}

/// Normalize an address or hash to lowercase with a `0x` prefix
pub fn normalize_address(address: &str) -> String {
    format!("0x{}", hex_body(address).to_lowercase())
}

fn hex_body(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Validate that an address is a 20-byte hex string
pub fn validate_address(address: &str) -> Result<(), TransferDetectionError> {
    let body = hex_body(address);

    if body.len() != 40 {
        return Err(TransferDetectionError::InvalidAddress(format!(
            "Address must be 40 hex characters long, got {}",
            body.len()
        )));
    }

    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TransferDetectionError::InvalidAddress(
            "Address contains non-hexadecimal characters".to_string(),
        ));
    }

    Ok(())
}

/// Extract an address from a 32-byte topic
fn extract_address_from_topic(topic: &str) -> Result<String, TransferDetectionError> {
    let body = hex_body(topic);

    if body.len() != 64 {
        return Err(TransferDetectionError::InvalidLog(format!(
            "Topic should be 64 characters, got {}",
            body.len()
        )));
    }

    // Address is in the last 20 bytes
    let address = &body[24..64];
    validate_address(address)?;

    Ok(normalize_address(address))
}

/// Extract the transferred value from the data field (32-byte big-endian integer).
///
/// Values wider than 128 bits saturate at `u128::MAX`, which clears any threshold.
fn extract_amount_from_data(data: &str) -> Result<u128, TransferDetectionError> {
    let body = hex_body(data);

    if body.len() != 64 {
        return Err(TransferDetectionError::InvalidAmount(format!(
            "Data should be 64 characters, got {}",
            body.len()
        )));
    }

    match parse_raw_units(&format!("0x{}", body)) {
        Ok(amount) => Ok(amount),
        Err(AmountError::Overflow(_)) => {
            LogContext::new("transfer_detector", "decode_amount")
                .warn(&format!("Transfer value 0x{} exceeds 128 bits, saturating", body));
            Ok(u128::MAX)
        }
        Err(e) => Err(TransferDetectionError::InvalidAmount(e.to_string())),
    }
}
