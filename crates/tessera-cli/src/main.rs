//! Tessera simulation runner.
//!
//! # Usage
//!
//! ```bash
//! # Two peers chatting, with receipts
//! tessera-sim pairwise
//!
//! # Group of five with membership changes, verbose
//! tessera-sim membership --members 4 --log-level debug
//! ```

use clap::Parser;
use tessera_cli::{Scenario, ScenarioConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tessera simulation runner
#[derive(Parser, Debug)]
#[command(name = "tessera-sim")]
#[command(about = "Run scripted Tessera sessions between in-process peers")]
#[command(version)]
struct Args {
    /// Script to run
    #[arg(value_enum, default_value = "pairwise")]
    scenario: Scenario,

    /// Peers besides the initiator
    #[arg(short, long, default_value = "2")]
    members: usize,

    /// Messages sent per phase
    #[arg(long, default_value = "3")]
    messages: usize,

    /// Seed for deterministic key material
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ScenarioConfig {
        scenario: args.scenario,
        members: args.members,
        messages: args.messages,
        seed: args.seed,
    };
    let report = tessera_cli::run(config).await?;

    tracing::info!(
        sent = report.sent,
        failed = report.failed,
        stored = report.stored,
        service = report.service,
        rejected = report.rejected,
        "done"
    );
    Ok(())
}
