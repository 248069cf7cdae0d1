//! gs-connector: exports gulfstream events from PostgreSQL to the event bus
//!
//! Tails the logical replication stream of the `gulfstream.outbox` table
//! and republishes every committed insert onto Kafka, acknowledging
//! progress back to the primary only for fully-published commits.

mod bridge;
mod core;
mod protocol;
mod replication;
mod sink;
mod utils;

use crate::core::config::{Config, LoggerConfig};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "gs-connector",
    about = "Exporting gulfstream-events from stream storage to eventbus",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bridge the PostgreSQL outbox table into Kafka
    #[command(visible_aliases = ["p2k", "pg2kfk"])]
    Postgres2kafka(BridgeArgs),
}

#[derive(Args, Debug)]
struct BridgeArgs {
    /// Path to the configuration file (default ./gs-connector.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drop and recreate the publication and replication slot, then exit
    #[arg(short, long)]
    renew_slot: bool,

    /// Drop the publication and replication slot, then exit
    #[arg(short, long)]
    drop_slot: bool,

    /// Print the resolved configuration before starting
    #[arg(short, long)]
    show_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Postgres2kafka(args) => run_postgres2kafka(args).await,
    };

    if let Err(e) = result {
        eprintln!("[ERROR] gs-connector: {e:#}");
        std::process::exit(1);
    }
}

async fn run_postgres2kafka(args: BridgeArgs) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    init_tracing(&config.logger);
    config.validate()?;

    if args.show_config {
        print!("{}", config.to_yaml()?);
    }

    if args.drop_slot {
        bridge::drop_slot(&config).await?;
        return Ok(());
    }
    if args.renew_slot {
        bridge::renew_slot(&config).await?;
        return Ok(());
    }

    info!(slot = config.postgres.slot_name(), "starting postgres2kafka bridge");
    bridge::run(&config).await?;
    info!("postgres2kafka bridge stopped");
    Ok(())
}

fn init_tracing(logger: &LoggerConfig) {
    let default_level = if logger.level.is_empty() {
        "info"
    } else {
        &logger.level
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if logger.formatter == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
