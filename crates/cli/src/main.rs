//! stockledger command line.
//!
//! ```bash
//! # Replay a scenario and print valuations, reconciliation and alerts
//! stockledger replay crates/cli/scenarios/two_receipts.json --pretty
//!
//! # Show the configuration resolved from STOCKLEDGER_* variables
//! stockledger config
//! ```

mod scenario;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use stockledger_infra::{InMemorySnapshotStore, InventoryConfig, InventoryService};

use crate::scenario::Scenario;

/// Inventory ledger and valuation tooling.
#[derive(Parser)]
#[command(name = "stockledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON scenario and print the resulting report.
    Replay {
        /// Path to the scenario file.
        path: PathBuf,

        /// Pretty-print the JSON report.
        #[arg(long)]
        pretty: bool,
    },

    /// Print the effective configuration as JSON.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = InventoryConfig::from_env().context("invalid STOCKLEDGER_* configuration")?;
    stockledger_observability::init(&config.log);

    match cli.command {
        Commands::Replay { path, pretty } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let scenario: Scenario = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse scenario {}", path.display()))?;

            let service = InventoryService::new(config, Arc::new(InMemorySnapshotStore::new()));
            let report = scenario::replay(&service, &scenario)?;
            print_json(&report, pretty)
        }
        Commands::Config => print_json(&config, true),
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}
