use std::io::Write;

use clap::{Parser, Subcommand};
use serde_json::Value;

use transfer_watcher::config::AppConfig;
use transfer_watcher::database::Database;
use transfer_watcher::models::{AlertTarget, NewWatcher, TransferEvent, TransportConfig, TransportKind, Watcher};
use transfer_watcher::notification::{AlertSeverity, NotificationDispatcher};

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Parser)]
#[command(name = "watcher-cli")]
#[command(about = "Manage ERC-20 transfer watchers and their notification transports")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database path (defaults to the configured one)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a token contract for transfers at or above a threshold
    AddWatcher {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        /// Token contract address
        #[arg(long)]
        token: String,
        /// Threshold in token units, e.g. 1000.5
        #[arg(long)]
        threshold: String,
        #[arg(long, default_value_t = 18)]
        decimals: u8,
    },
    /// Attach a notification transport to a watcher
    AddTransport {
        #[arg(long)]
        watcher_id: i64,
        /// slack, discord, telegram or email
        #[arg(long)]
        kind: String,
        /// Transport settings as JSON, e.g. '{"webhook_url":"https://..."}'
        #[arg(long)]
        config: String,
    },
    ListWatchers {
        /// Only watchers of this user
        #[arg(long)]
        user: Option<String>,
    },
    /// Stop polling a watcher, keeping its history
    Deactivate { watcher_id: i64 },
    /// Delete a watcher with its transports and events
    DeleteWatcher { watcher_id: i64 },
    /// Show recorded transfer events of a watcher
    Events {
        watcher_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Send a test notification through a transport without storing anything
    TestNotify {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        config: String,
        #[arg(long, default_value = "Test watcher")]
        name: String,
    },
    /// Print a sample configuration file
    SampleConfig {
        /// Write to this path instead of stdout
        #[arg(long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(e) = execute(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config_or_default(&mut std::io::stderr());
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    match cli.command {
        Commands::SampleConfig { output } => {
            match output {
                Some(path) => {
                    AppConfig::default().save_to_file(&path)?;
                    println!("Sample configuration written to {}", path);
                }
                None => print!("{}", AppConfig::generate_sample_config()?),
            }
            Ok(())
        }
        Commands::TestNotify { kind, config: raw, name } => {
            let kind: TransportKind = kind.parse()?;
            let raw: Value = serde_json::from_str(&raw)?;
            let transport = TransportConfig::parse(kind, &raw)?;
            test_notify(&config, &name, transport).await
        }
        command => {
            let database = Database::open_with_config(&config.database)?;
            manage(&database, command)
        }
    }
}

/// Load the configuration, telling the operator on `out` when falling back to defaults
fn load_config_or_default(out: &mut impl Write) -> AppConfig {
    match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            let _ = writeln!(out, "Warning: ignoring configuration ({}), using defaults", e);
            AppConfig::default()
        }
    }
}

fn manage(database: &Database, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::AddWatcher {
            user,
            name,
            token,
            threshold,
            decimals,
        } => {
            let new_watcher = NewWatcher::new(&user, &name, &token, &threshold).with_decimals(decimals);
            let watcher = database.create_watcher(&new_watcher)?;
            println!("Created watcher {} ({})", watcher.id, watcher.name);
        }
        Commands::AddTransport {
            watcher_id,
            kind,
            config,
        } => {
            let kind: TransportKind = kind.parse()?;
            let raw: Value = serde_json::from_str(&config)?;
            let transport = database.add_transport(watcher_id, kind, &raw)?;
            println!("Added {} transport {} to watcher {}", kind, transport.id, watcher_id);
        }
        Commands::ListWatchers { user } => {
            let watchers = match user {
                Some(user) => database.list_user_watchers(&user)?,
                None => database.list_all_watchers()?,
            };
            if watchers.is_empty() {
                println!("No watchers");
            }
            for watcher in &watchers {
                print_watcher(watcher);
            }
        }
        Commands::Deactivate { watcher_id } => {
            database.deactivate_watcher(watcher_id)?;
            println!("Watcher {} deactivated", watcher_id);
        }
        Commands::DeleteWatcher { watcher_id } => {
            database.delete_watcher(watcher_id)?;
            println!("Watcher {} deleted", watcher_id);
        }
        Commands::Events { watcher_id, limit } => {
            let events = database.recent_events(watcher_id, limit)?;
            let total = database.event_count(Some(watcher_id))?;
            println!("Showing {} of {} event(s) for watcher {}", events.len(), total, watcher_id);
            for event in &events {
                println!(
                    "  block {:>10}  {}  {} -> {}  {}",
                    event.block_number, event.transaction_hash, event.from_address, event.to_address, event.amount
                );
            }
        }
        Commands::SampleConfig { .. } | Commands::TestNotify { .. } => {}
    }
    Ok(())
}

fn print_watcher(watcher: &Watcher) {
    let status = if watcher.active { "active" } else { "inactive" };
    println!(
        "#{} {} [{}] user={} token={} threshold={} decimals={}",
        watcher.id, watcher.name, status, watcher.user_id, watcher.token_address, watcher.threshold, watcher.decimals
    );
    for transport in &watcher.transports {
        println!("    transport #{} {}", transport.id, transport.kind());
    }
}

async fn test_notify(
    config: &AppConfig,
    name: &str,
    transport: TransportConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = NotificationDispatcher::from_config(config)?;
    let target = AlertTarget::synthetic(name, ZERO_ADDRESS, vec![transport]);
    let event = TransferEvent {
        id: 0,
        watcher_id: 0,
        token_address: ZERO_ADDRESS.to_string(),
        from_address: ZERO_ADDRESS.to_string(),
        to_address: ZERO_ADDRESS.to_string(),
        amount: "1".to_string(),
        transaction_hash: format!("0x{}", "0".repeat(64)),
        block_number: 0,
        usd_value: None,
        created_at: chrono::Utc::now().timestamp(),
    };

    let report = dispatcher.dispatch(&target, &[event], AlertSeverity::Test).await;
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(attempts) => println!("{}: delivered after {} attempt(s)", outcome.channel, attempts),
            Err(failure) => println!("{}: {}", outcome.channel, failure),
        }
    }
    if report.failed() > 0 {
        return Err(format!("{} transport(s) failed", report.failed()).into());
    }
    Ok(())
}
