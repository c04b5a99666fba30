pub mod blockchain;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod notification;
pub mod retry;

pub use blockchain::{PollLoop, PollLoopConfig, RpcClient};
pub use config::{AppConfig, ChainConfig, DatabaseConfig, LoggingConfig, NotificationConfig, PollingConfig};
pub use database::{Database, EventStore};
pub use error::{AlertError, Result};
pub use logging::{ErrorLogger, LogContext, LogFormat, MetricsLogger, PerformanceMonitor};
pub use notification::{AlertSeverity, NotificationDispatcher};
pub use retry::{Backoff, RetryConfig, RetryManager};
