use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use transfer_watcher::blockchain::{
    HttpMetadataSource, PollLoop, PollLoopConfig, RpcClient, RpcTransferFetcher, TokenMetadataCache,
};
use transfer_watcher::config::AppConfig;
use transfer_watcher::database::Database;
use transfer_watcher::logging::{init_logging, LogFormat};
use transfer_watcher::notification::NotificationDispatcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_logging(&config.logging.level, config.logging.format.parse::<LogFormat>()?)?;

    info!("Starting ERC-20 transfer watcher");

    let database = Database::open_with_config(&config.database).map_err(|e| {
        error!("Failed to open database at '{}': {}", config.database.path, e);
        e
    })?;
    info!("Database ready at {}", config.database.path);

    let chain = &config.chain;
    let rpc = RpcClient::with_api_key(&chain.rpc_url, chain.api_key.as_deref(), chain.timeout_seconds)?;
    let fetcher = RpcTransferFetcher::new(rpc.clone()).with_max_block_range(chain.max_block_range);

    // Symbols always come from the chain; prices only when the market lookup is enabled
    let source = HttpMetadataSource::new(rpc, &config.market, chain.timeout_seconds)?;
    let metadata = TokenMetadataCache::new(Box::new(source), Duration::from_secs(config.market.cache_ttl_seconds));

    let dispatcher = NotificationDispatcher::from_config(&config)?;

    let poll_loop = PollLoop::new(
        Arc::new(database),
        Arc::new(fetcher),
        dispatcher,
        Some(metadata),
        PollLoopConfig::from(&config.polling),
    );
    poll_loop.run().await;

    info!("Transfer watcher stopped");
    Ok(())
}
