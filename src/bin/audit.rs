//! Run the invariant verifier over ledger snapshots.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use offer_cross::{verify, LedgerSnapshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audit", about = "Check ledger snapshots for crossed books and owner-count drift", version)]
struct Cli {
    /// Snapshot JSON files
    #[arg(required = true)]
    snapshots: Vec<PathBuf>,

    /// Print one compact JSON report per line
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut unhealthy = 0usize;

    for path in &cli.snapshots {
        let snapshot = LedgerSnapshot::from_json_file(path)?;
        let report = verify(&snapshot);

        if report.is_healthy() {
            info!(path = %path.display(), ledger_index = report.ledger_index, "snapshot healthy");
        } else {
            unhealthy += 1;
            warn!(
                path = %path.display(),
                ledger_index = report.ledger_index,
                crossed_books = report.crossed_books.len(),
                owner_count_mismatches = report.owner_count_mismatches.len(),
                self_referencing_lines = report.self_referencing_lines.len(),
                "snapshot has invariant findings"
            );
        }

        let json = if cli.compact {
            serde_json::to_string(&report)?
        } else {
            serde_json::to_string_pretty(&report)?
        };
        println!("{json}");
    }

    Ok(if unhealthy == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
