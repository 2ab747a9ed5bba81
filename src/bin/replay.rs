//! Apply a CSV batch of orders to a ledger snapshot.
//!
//! Usage: replay <SNAPSHOT> <ORDERS> [--config FILE] [--output FILE] [--verify] [--close [RFC3339]]

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use offer_cross::replay::read_commands_from_path;
use offer_cross::{verify, Engine, EngineConfig, LedgerSnapshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replay", about = "Cross a batch of orders against a ledger snapshot", version)]
struct Cli {
    /// Snapshot JSON the batch applies to
    snapshot: PathBuf,

    /// Order CSV (kind,account,taker_pays,taker_gets,sell,sequence)
    orders: PathBuf,

    /// Engine configuration TOML
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the resulting snapshot here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Audit the resulting snapshot
    #[arg(long)]
    verify: bool,

    /// Close the ledger after the batch, at the given time or now
    #[arg(long, value_name = "RFC3339")]
    close: Option<Option<DateTime<Utc>>>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let snapshot = LedgerSnapshot::from_json_file(&cli.snapshot)?;
    let commands = read_commands_from_path(&cli.orders)?;
    info!(
        snapshot = %cli.snapshot.display(),
        commands = commands.len(),
        "replaying batch"
    );

    let mut engine = Engine::new(config, snapshot);
    let outcomes = engine.apply_batch(commands);
    if let Some(close_time) = cli.close {
        engine.close(close_time.unwrap_or_else(Utc::now));
    }

    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    let rejected = outcomes.iter().filter(|o| o.status.is_rejected()).count();
    info!(
        outcomes = outcomes.len(),
        rejected,
        state_hash = %engine.state_hash(),
        "batch applied"
    );

    let snapshot = engine.into_snapshot();
    if let Some(path) = &cli.output {
        snapshot.to_json_file(path)?;
        info!(path = %path.display(), "snapshot written");
    }

    if cli.verify {
        let report = verify(&snapshot);
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.is_healthy() {
            return Err(format!("snapshot has {} invariant findings", report.finding_count()).into());
        }
    }

    Ok(())
}
