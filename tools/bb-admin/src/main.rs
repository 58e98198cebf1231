//! BB-Admin entry point.

use anyhow::{Context, Result};
use clap::Parser;

use bb_admin::{execute, Args};
use bb_relationship_sync::SyncConfig;
use bb_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::for_component("admin");
    if args.json_logs {
        telemetry.json_logs = true;
    }
    let _telemetry = init_telemetry(telemetry).context("failed to initialize telemetry")?;

    let config = SyncConfig::from_env().context("invalid sync configuration")?;
    tracing::debug!(command = args.command.name(), store = %args.store.display(), "running command");

    let output = execute(&args.store, config, &args.command).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to render output")?
    );

    if args.metrics {
        print!("{}", encode_metrics().context("failed to encode metrics")?);
    }
    Ok(())
}
