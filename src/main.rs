use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};

use straddle::config::AppConfig;
use straddle::dispatcher::TickDispatcher;
use straddle::domain::{EngineEvent, Tick};
use straddle::error::{Result, StraddleError};
use straddle::gateway::Credentials;
use straddle::logging;
use straddle::registry::StrategyRegistry;

#[derive(Parser)]
#[command(name = "straddle", about = "Options cycle-trading execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay tick batches through the full engine stack (paper gateway)
    Run {
        /// Configuration directory
        #[arg(long, default_value = "config")]
        config_dir: String,
        /// Newline-delimited JSON file: one tick-batch array per line
        #[arg(long)]
        ticks: String,
        /// Active user ids
        #[arg(long, value_delimiter = ',', required = true)]
        users: Vec<String>,
    },
    /// Validate the configuration and exit
    CheckConfig {
        #[arg(long, default_value = "config")]
        config_dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config_dir,
            ticks,
            users,
        } => {
            logging::init_logging();
            run_replay(&config_dir, &ticks, users).await
        }
        Commands::CheckConfig { config_dir } => {
            logging::init_logging_simple();
            check_config(&config_dir)
        }
    }
}

fn load_config(config_dir: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(config_dir)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Config error: {e}");
        }
        return Err(StraddleError::Validation(errors.join("; ")));
    }
    Ok(config)
}

fn check_config(config_dir: &str) -> Result<()> {
    let config = load_config(config_dir)?;
    println!(
        "Configuration OK: max_concurrent={}, target={}, stoploss={}, quantity={}",
        config.dispatcher.max_concurrent,
        config.strategy.target,
        config.strategy.stoploss,
        config.strategy.quantity
    );
    Ok(())
}

async fn run_replay(config_dir: &str, ticks_path: &str, users: Vec<String>) -> Result<()> {
    let config = load_config(config_dir)?;
    let max_concurrent = config.dispatcher.max_concurrent;

    let registry = Arc::new(StrategyRegistry::new(config));
    let dispatcher = TickDispatcher::new(max_concurrent);

    // Paper credentials for every replayed user
    let credentials = Credentials::new("paper", "paper", "paper");
    for user in &users {
        registry.set_credentials(user, &credentials).await?;
    }

    // Relay trades and phase transitions to the log; a real deployment
    // forwards these to its push channel instead
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Trade {
                    user_id,
                    action,
                    symbol,
                    price,
                    quantity,
                    cycle,
                    ..
                } => info!(user = %user_id, cycle, "{action} {quantity} x {symbol} @ {price}"),
                EngineEvent::PhaseTransition {
                    user_id,
                    cycle,
                    from,
                    to,
                    context,
                } => info!(user = %user_id, cycle, "{from} -> {to} ({context})"),
                _ => {}
            }
        }
    });

    let content = tokio::fs::read_to_string(ticks_path).await?;
    let mut batches = 0usize;

    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let batch: Vec<Tick> = match serde_json::from_str(line) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Skipping unreadable batch on line {}: {e}", lineno + 1);
                continue;
            }
        };

        let report = dispatcher
            .dispatch(&batch, &users, registry.clone())
            .await;
        batches += 1;

        if report.errors > 0 {
            warn!(
                batch = batches,
                errors = report.errors,
                "Batch completed with per-user errors"
            );
        }
    }

    let stats = dispatcher.stats();
    info!(
        batches,
        processed = stats.total_processed,
        errors = stats.total_errors,
        avg_latency_ms = stats.avg_latency_ms,
        "Replay finished"
    );

    Ok(())
}
