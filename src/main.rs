use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scanx_rs::config::ScreenerConfig;
use scanx_rs::screener::ScreenerEngine;
use scanx_rs::telemetry;

/// Live small-cap momentum screener: streams trades, republishes the ones
/// that pass the screen to WebSocket subscribers.
#[derive(Parser, Debug)]
#[command(name = "scanx", version, about)]
struct Cli {
    /// Optional TOML config file, layered under SCANX_* and the plain env vars
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_filter);

    let config = ScreenerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    telemetry::init_metrics(config.metrics_port);

    let engine = ScreenerEngine::new(config).context("building screener")?;
    engine.run().await.context("screener stopped")?;
    Ok(())
}
