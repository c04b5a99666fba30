pub mod cursor;
pub mod fetcher;
pub mod poll_loop;
pub mod rpc_client;
pub mod threshold;
pub mod token_metadata;
pub mod transfer_detector;

pub use cursor::ScanCursorResolver;
pub use fetcher::{RpcTransferFetcher, TransferFetcher};
pub use poll_loop::{CycleReport, PollLoop, PollLoopConfig};
pub use rpc_client::{LogFilter, RawLog, RpcClient};
pub use threshold::ThresholdFilter;
pub use token_metadata::{HttpMetadataSource, TokenMetadata, TokenMetadataCache, TokenMetadataSource};
pub use transfer_detector::{normalize_address, validate_address, TransferDetectionError, TransferDetector};
