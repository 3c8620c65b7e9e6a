mod report;
mod scenario;

use std::time::Duration;

use clap::Parser;
use scenario::{Scenario, SimParams};
use tom_backfill::BackfillConfig;

#[derive(Parser)]
#[command(
    name = "tom-backfill-sim",
    about = "Run one backfill session in-process, with an optional fault"
)]
struct Cli {
    /// Number of keys the backfiller holds.
    #[arg(long, default_value = "100")]
    keys: usize,

    /// Fault to inject mid-transfer.
    #[arg(long, value_enum, default_value = "commit")]
    scenario: Scenario,

    /// Delay the backfiller waits before each chunk, in ms.
    #[arg(long, default_value = "0")]
    chunk_delay_ms: u64,

    /// Heartbeat interval in ms (default: TOM_BACKFILL_HEARTBEAT_MS or 1000).
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Heartbeat timeout in ms (default: TOM_BACKFILL_HEARTBEAT_TIMEOUT_MS or 5000).
    #[arg(long)]
    heartbeat_timeout_ms: Option<u64>,

    /// Print the report as one JSON line.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = BackfillConfig::new();
    if let Some(ms) = cli.heartbeat_ms {
        config = config.heartbeat_interval(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.heartbeat_timeout_ms {
        config = config.heartbeat_timeout(Duration::from_millis(ms));
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let params = SimParams {
        keys: cli.keys,
        scenario: cli.scenario,
        chunk_delay: Duration::from_millis(cli.chunk_delay_ms),
        config,
    };
    let report = scenario::run(params).await?;

    if cli.json {
        report::emit_json(&report)?;
    } else {
        report::print(&report);
    }

    if !report.matched {
        std::process::exit(1);
    }
    Ok(())
}
