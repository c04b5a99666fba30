//! The watcher poll loop.
//!
//! One cycle visits every active watcher in turn: resolve where its scan
//! starts, fetch transfers from there, keep those at or above the threshold,
//! persist each one idempotently and alert on the ones that were new. A
//! watcher that fails is logged and skipped; the cycle moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use serde_json::json;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::blockchain::cursor::ScanCursorResolver;
use crate::blockchain::fetcher::TransferFetcher;
use crate::blockchain::threshold::ThresholdFilter;
use crate::blockchain::token_metadata::{TokenMetadata, TokenMetadataCache};
use crate::config::PollingConfig;
use crate::database::EventStore;
use crate::error::AlertError;
use crate::logging::{ErrorLogger, LogContext, MetricsLogger, PerformanceMonitor};
use crate::models::{AlertTarget, EventInsert, NewTransferEvent, Watcher};
use crate::notification::{AlertSeverity, NotificationDispatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollLoopConfig {
    pub poll_interval: Duration,
    /// Pause between two watchers of the same cycle
    pub watcher_delay: Duration,
    /// First block scanned for a watcher with no recorded events
    pub start_block: u64,
}

impl Default for PollLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            watcher_delay: Duration::from_millis(1000),
            start_block: 0,
        }
    }
}

impl From<&PollingConfig> for PollLoopConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            watcher_delay: Duration::from_millis(config.watcher_delay_ms),
            start_block: config.start_block,
        }
    }
}

/// Counters for one pass over the active watchers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub watchers_scanned: usize,
    /// Watchers whose scan failed this cycle
    pub watchers_skipped: usize,
    pub events_created: usize,
    pub duplicates: usize,
    pub deliveries_failed: usize,
}

#[derive(Debug, Default)]
struct WatcherReport {
    events_created: usize,
    duplicates: usize,
    deliveries_failed: usize,
}

pub struct PollLoop {
    store: Arc<dyn EventStore>,
    fetcher: Arc<dyn TransferFetcher>,
    dispatcher: NotificationDispatcher,
    metadata: Option<TokenMetadataCache>,
    cursor: ScanCursorResolver,
    pub config: PollLoopConfig,
    pub shutdown_signal: Arc<AtomicBool>,
    /// Wakes `run` out of its wait between cycles
    shutdown_notify: Arc<Notify>,
}

impl PollLoop {
    pub fn new(
        store: Arc<dyn EventStore>,
        fetcher: Arc<dyn TransferFetcher>,
        dispatcher: NotificationDispatcher,
        metadata: Option<TokenMetadataCache>,
        config: PollLoopConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            dispatcher,
            metadata,
            cursor: ScanCursorResolver::new(config.start_block),
            config,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Repeat cycles on the poll interval until shutdown is requested
    pub async fn run(&self) {
        info!(
            "Starting poll loop with {} second interval",
            self.config.poll_interval.as_secs()
        );

        let shutdown_signal = Arc::clone(&self.shutdown_signal);
        let shutdown_notify = Arc::clone(&self.shutdown_notify);
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    shutdown_signal.store(true, Ordering::Relaxed);
                    shutdown_notify.notify_one();
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                }
            }
        });

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.is_shutting_down() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown_notify.notified() => {}
            }
            if self.is_shutting_down() {
                break;
            }
            self.run_cycle().await;
        }

        info!("Poll loop stopped");
    }

    /// Request a graceful stop after the current watcher
    pub fn shutdown(&self) {
        info!("Requesting graceful shutdown");
        self.shutdown_signal.store(true, Ordering::Relaxed);
        // Leaves a permit behind when `run` is not waiting yet
        self.shutdown_notify.notify_one();
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown_signal.load(Ordering::Relaxed)
    }

    /// One pass over every active watcher
    pub async fn run_cycle(&self) -> CycleReport {
        let monitor = PerformanceMonitor::new("poll_cycle");
        let mut report = CycleReport::default();

        let watchers = match self.store.active_watchers() {
            Ok(watchers) => watchers,
            Err(e) => {
                ErrorLogger::log_error(&AlertError::Persistence(e), Some(LogContext::new("poll_loop", "load_watchers")));
                monitor.finish();
                return report;
            }
        };
        debug!("Polling {} active watcher(s)", watchers.len());

        for (index, watcher) in watchers.iter().enumerate() {
            if self.is_shutting_down() {
                info!("Shutdown requested, ending cycle early");
                break;
            }
            if index > 0 && !self.config.watcher_delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.config.watcher_delay) => {}
                    _ = self.shutdown_notify.notified() => {
                        info!("Shutdown requested, ending cycle early");
                        break;
                    }
                }
            }

            report.watchers_scanned += 1;
            match self.poll_watcher(watcher).await {
                Ok(outcome) => {
                    report.events_created += outcome.events_created;
                    report.duplicates += outcome.duplicates;
                    report.deliveries_failed += outcome.deliveries_failed;
                }
                Err(e) => {
                    report.watchers_skipped += 1;
                    let context = LogContext::new("poll_loop", "poll_watcher")
                        .with_watcher_id(watcher.id)
                        .with_address(&watcher.token_address);
                    ErrorLogger::log_error(&e, Some(context));
                }
            }
        }

        let duration_ms = monitor
            .with_metadata("watchers", json!(watchers.len()))
            .finish();
        MetricsLogger::log_cycle_completed(
            report.watchers_scanned,
            report.watchers_skipped,
            report.events_created,
            report.duplicates,
            report.deliveries_failed,
            duration_ms,
        );
        report
    }

    async fn poll_watcher(&self, watcher: &Watcher) -> Result<WatcherReport, AlertError> {
        let filter = ThresholdFilter::for_watcher(watcher)?;
        let start_block = self.cursor.resolve(self.store.as_ref(), watcher.id)?;

        let transfers = self
            .fetcher
            .fetch_transfers(&watcher.token_address, start_block)
            .await?;
        let qualifying = filter.filter(&transfers);

        LogContext::new("poll_loop", "poll_watcher")
            .with_watcher_id(watcher.id)
            .with_block_number(start_block)
            .with_metadata("fetched", json!(transfers.len()))
            .with_metadata("qualifying", json!(qualifying.len()))
            .debug("Scanned watcher");

        let mut outcome = WatcherReport::default();
        if qualifying.is_empty() {
            return Ok(outcome);
        }

        let metadata = match &self.metadata {
            Some(cache) => cache.get(&watcher.token_address).await,
            None => TokenMetadata::default(),
        };
        let target = AlertTarget::from(watcher).with_symbol(metadata.symbol.clone());

        for transfer in &qualifying {
            let usd_value = metadata.usd_price.map(|price| price * transfer.amount.to_f64());
            let new_event = NewTransferEvent::from_qualifying(watcher.id, &watcher.token_address, transfer, usd_value);

            let event = match self.store.create_event(&new_event)? {
                EventInsert::Created(event) => event,
                EventInsert::Duplicate(event) => {
                    outcome.duplicates += 1;
                    LogContext::new("poll_loop", "create_event")
                        .with_watcher_id(watcher.id)
                        .with_transaction_hash(&event.transaction_hash)
                        .debug("Transfer already recorded");
                    continue;
                }
            };

            outcome.events_created += 1;
            MetricsLogger::log_event_recorded(watcher.id, &event.transaction_hash, event.block_number, &event.amount);

            let severity = AlertSeverity::classify(std::slice::from_ref(&event), filter.threshold());
            let report = self
                .dispatcher
                .dispatch(&target, std::slice::from_ref(&event), severity)
                .await;
            outcome.deliveries_failed += report.failed();
        }

        Ok(outcome)
    }
}
