use serde::{Deserialize, Serialize};

use crate::models::amount::TokenAmount;

/// A decoded ERC-20 Transfer as returned by the transfer feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransfer {
    pub block_number: u64,
    pub log_index: u32,
    /// Integer base units, not yet normalized by decimals
    pub raw_amount: u128,
    pub transaction_hash: String,
    pub from_address: String,
    pub to_address: String,
}

/// A raw transfer that met a watcher's threshold
#[derive(Debug, Clone, PartialEq)]
pub struct QualifyingTransfer {
    pub transfer: RawTransfer,
    pub amount: TokenAmount,
}

/// Candidate passed to the event store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransferEvent {
    pub watcher_id: i64,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    /// Decimal string in token display units
    pub amount: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub usd_value: Option<f64>,
}

impl NewTransferEvent {
    pub fn from_qualifying(
        watcher_id: i64,
        token_address: &str,
        qualifying: &QualifyingTransfer,
        usd_value: Option<f64>,
    ) -> Self {
        Self {
            watcher_id,
            token_address: token_address.to_string(),
            from_address: qualifying.transfer.from_address.clone(),
            to_address: qualifying.transfer.to_address.clone(),
            amount: qualifying.amount.to_decimal_string(),
            transaction_hash: qualifying.transfer.transaction_hash.clone(),
            block_number: qualifying.transfer.block_number,
            usd_value,
        }
    }
}

/// A persisted qualifying transfer for one watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub id: i64,
    pub watcher_id: i64,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub usd_value: Option<f64>,
    /// Unix seconds
    pub created_at: i64,
}

/// Outcome of an idempotent insert
#[derive(Debug, Clone, PartialEq)]
pub enum EventInsert {
    /// First observation; the caller should notify
    Created(TransferEvent),
    /// Already recorded for this watcher; must not be notified again
    Duplicate(TransferEvent),
}

impl EventInsert {
    pub fn is_new(&self) -> bool {
        matches!(self, EventInsert::Created(_))
    }

    pub fn event(&self) -> &TransferEvent {
        match self {
            EventInsert::Created(event) | EventInsert::Duplicate(event) => event,
        }
    }

    pub fn into_event(self) -> TransferEvent {
        match self {
            EventInsert::Created(event) | EventInsert::Duplicate(event) => event,
        }
    }
}
