use log::{debug, error, info, trace, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AlertError, ConfigError, ErrorSeverity};
use crate::models::TransportKind;

/// Structured logging context for the watcher
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub metadata: HashMap<String, Value>,
}

impl LogContext {
    pub fn new(component: &str, operation: &str) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn with_watcher_id(self, watcher_id: i64) -> Self {
        self.with_metadata("watcher_id", json!(watcher_id))
    }

    pub fn with_block_number(self, block_number: u64) -> Self {
        self.with_metadata("block_number", json!(block_number))
    }

    pub fn with_transaction_hash(self, tx_hash: &str) -> Self {
        self.with_metadata("transaction_hash", json!(tx_hash))
    }

    pub fn with_address(self, address: &str) -> Self {
        self.with_metadata("address", json!(address))
    }

    pub fn with_channel(self, channel: TransportKind) -> Self {
        self.with_metadata("channel", json!(channel.as_str()))
    }

    pub fn with_duration_ms(self, duration_ms: u64) -> Self {
        self.with_metadata("duration_ms", json!(duration_ms))
    }

    pub fn with_retry_count(self, retry_count: u32) -> Self {
        self.with_metadata("retry_count", json!(retry_count))
    }

    fn format_message(&self, level: &str, message: &str) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut log_entry = json!({
            "timestamp": timestamp,
            "level": level,
            "component": self.component,
            "operation": self.operation,
            "message": message,
        });

        for (key, value) in &self.metadata {
            log_entry[key] = value.clone();
        }

        log_entry.to_string()
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_message("INFO", message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.format_message("WARN", message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.format_message("ERROR", message));
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_message("DEBUG", message));
    }

    pub fn trace(&self, message: &str) {
        trace!("{}", self.format_message("TRACE", message));
    }
}

/// Times an operation and logs its duration when finished
pub struct PerformanceMonitor {
    pub start_time: SystemTime,
    operation: String,
    metadata: HashMap<String, Value>,
}

impl PerformanceMonitor {
    pub fn new(operation: &str) -> Self {
        Self {
            start_time: SystemTime::now(),
            operation: operation.to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    fn elapsed_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_millis() as u64
    }

    fn into_context(self, duration: u64) -> LogContext {
        let mut context = LogContext::new("performance", &self.operation).with_duration_ms(duration);
        for (key, value) in self.metadata {
            context = context.with_metadata(&key, value);
        }
        context
    }

    pub fn finish(self) -> u64 {
        let duration = self.elapsed_ms();
        self.into_context(duration)
            .debug(&format!("Operation completed in {}ms", duration));
        duration
    }

    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) -> u64
    where
        E: std::fmt::Display,
    {
        let duration = self.elapsed_ms();
        let context = self.into_context(duration);

        match result {
            Ok(_) => context.debug(&format!("Operation completed successfully in {}ms", duration)),
            Err(e) => context
                .with_metadata("error", json!(e.to_string()))
                .warn(&format!("Operation failed after {}ms: {}", duration, e)),
        }

        duration
    }
}

/// Error logging utilities
pub struct ErrorLogger;

impl ErrorLogger {
    pub fn log_error(error: &AlertError, context: Option<LogContext>) {
        let severity = error.severity();

        let log_context = context
            .unwrap_or_else(|| LogContext::new("error", "unknown"))
            .with_metadata("error_type", json!(format!("{:?}", error)))
            .with_metadata("severity", json!(format!("{:?}", severity)))
            .with_metadata("recoverable", json!(error.is_recoverable()));

        let message = format!("Error occurred: {}", error);

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => log_context.error(&message),
            ErrorSeverity::Medium => log_context.warn(&message),
            ErrorSeverity::Low => log_context.info(&message),
        }
    }

    /// Logs one failed attempt of a retried operation
    pub fn log_retry_attempt(operation: &str, error: &str, attempt: u32, max_attempts: u32, next_delay_ms: Option<u64>) {
        let mut context = LogContext::new("retry", operation)
            .with_retry_count(attempt)
            .with_metadata("max_attempts", json!(max_attempts))
            .with_metadata("error", json!(error));

        match next_delay_ms {
            Some(delay) => {
                context = context.with_metadata("next_delay_ms", json!(delay));
                context.warn(&format!(
                    "Attempt {} of {} failed, retrying in {}ms: {}",
                    attempt, max_attempts, delay, error
                ));
            }
            None => context.error(&format!("Attempt {} of {} failed, giving up: {}", attempt, max_attempts, error)),
        }
    }

    pub fn log_recovery_success(operation: &str, attempts: u32, total_duration_ms: u64) {
        let context = LogContext::new("retry", "success")
            .with_metadata("operation", json!(operation))
            .with_retry_count(attempts)
            .with_duration_ms(total_duration_ms);

        context.info(&format!(
            "Operation {} recovered after {} attempts in {}ms",
            operation, attempts, total_duration_ms
        ));
    }
}

/// Application metrics and monitoring
pub struct MetricsLogger;

impl MetricsLogger {
    pub fn log_rpc_call(method: &str, duration_ms: u64, success: bool) {
        let context = LogContext::new("metrics", "rpc_call")
            .with_metadata("method", json!(method))
            .with_duration_ms(duration_ms)
            .with_metadata("success", json!(success));

        if success {
            context.debug(&format!("RPC call {} completed in {}ms", method, duration_ms));
        } else {
            context.warn(&format!("RPC call {} failed after {}ms", method, duration_ms));
        }
    }

    pub fn log_event_recorded(watcher_id: i64, tx_hash: &str, block_number: u64, amount: &str) {
        LogContext::new("metrics", "event_recorded")
            .with_watcher_id(watcher_id)
            .with_transaction_hash(tx_hash)
            .with_block_number(block_number)
            .with_metadata("amount", json!(amount))
            .info(&format!("Recorded transfer of {} in block {}", amount, block_number));
    }

    pub fn log_delivery(channel: TransportKind, watcher_id: i64, event_count: usize, attempts: u32, success: bool) {
        let context = LogContext::new("metrics", "delivery")
            .with_channel(channel)
            .with_watcher_id(watcher_id)
            .with_retry_count(attempts)
            .with_metadata("event_count", json!(event_count))
            .with_metadata("success", json!(success));

        if success {
            context.info(&format!(
                "Delivered {} event(s) via {} in {} attempt(s)",
                event_count, channel, attempts
            ));
        } else {
            context.warn(&format!("Delivery via {} failed after {} attempt(s)", channel, attempts));
        }
    }

    pub fn log_cycle_completed(
        watchers_scanned: usize,
        watchers_skipped: usize,
        events_created: usize,
        duplicates: usize,
        deliveries_failed: usize,
        duration_ms: u64,
    ) {
        let context = LogContext::new("metrics", "cycle_completed")
            .with_metadata("watchers_scanned", json!(watchers_scanned))
            .with_metadata("watchers_skipped", json!(watchers_skipped))
            .with_metadata("events_created", json!(events_created))
            .with_metadata("duplicates", json!(duplicates))
            .with_metadata("deliveries_failed", json!(deliveries_failed))
            .with_duration_ms(duration_ms);

        let message = format!(
            "Cycle finished: {} watcher(s) scanned, {} skipped, {} new event(s) in {}ms",
            watchers_scanned, watchers_skipped, events_created, duration_ms
        );
        if watchers_skipped > 0 || deliveries_failed > 0 {
            context.warn(&message);
        } else {
            context.info(&message);
        }
    }
}

/// Output format of the process logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One compact JSON object per line
    Json,
    /// Indented structured entries and timestamped plain lines
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Render one log record in `format`. Plain messages are wrapped in a JSON object in json mode.
pub fn render_record(format: LogFormat, level: log::Level, target: &str, message: &str) -> String {
    let structured = serde_json::from_str::<Value>(message).ok().filter(Value::is_object);
    let timestamp = chrono::Utc::now();

    match (format, structured) {
        (LogFormat::Json, Some(entry)) => entry.to_string(),
        (LogFormat::Json, None) => json!({
            "timestamp": timestamp.timestamp_millis(),
            "level": level.to_string(),
            "target": target,
            "message": message,
        })
        .to_string(),
        (LogFormat::Pretty, Some(entry)) => {
            serde_json::to_string_pretty(&entry).unwrap_or_else(|_| entry.to_string())
        }
        (LogFormat::Pretty, None) => format!(
            "{} [{}] {}: {}",
            timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            target,
            message
        ),
    }
}

/// Initialize structured logging for the application.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(move |buf, record| {
            use std::io::Write;

            let message = record.args().to_string();
            writeln!(buf, "{}", render_record(format, record.level(), record.target(), &message))
        })
        .try_init()?;

    info!("Structured logging initialized ({:?})", format);
    Ok(())
}
