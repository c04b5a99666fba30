pub mod amount;
pub mod transfer;
pub mod watcher;

pub use amount::{AmountError, TokenAmount, DEFAULT_DECIMALS};
pub use transfer::{EventInsert, NewTransferEvent, QualifyingTransfer, RawTransfer, TransferEvent};
pub use watcher::{AlertTarget, NewWatcher, Transport, TransportConfig, TransportKind, Watcher};
