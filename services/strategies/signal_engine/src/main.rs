//! Signal engine service entry point

use anyhow::{Context, Result};
use clap::Parser;
use signal_dashboard::DashboardServer;
use signal_engine::{resolve_config_path, EngineConfig, Feed, RelayConsumer, SignalEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "signal_engine=info,signal_dashboard=info,warn";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (falls back to SIGNAL_ENGINE_CONFIG, then configs/signal_engine.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Override the dashboard bind address
    #[arg(long)]
    bind_address: Option<String>,

    /// Override the dashboard port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let path = resolve_config_path(args.config.clone());
    let mut config = EngineConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if let Some(bind_address) = &args.bind_address {
        config.dashboard.bind_address = bind_address.clone();
    }
    if let Some(port) = args.port {
        config.dashboard.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!("Starting signal engine v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(&args)?;
    info!(
        "Risk limits: {} per trade, {} daily drawdown, {} open positions, paper trading {}",
        config.risk.max_risk_fraction,
        config.risk.max_daily_drawdown,
        config.risk.max_open_positions,
        config.risk.paper_trading
    );

    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(SignalEngine::start(config.clone(), output_tx));

    let server = DashboardServer::new(config.dashboard.clone(), Arc::new(engine.control_handle()));
    let clients = server.client_manager();
    let forwarder = tokio::spawn(async move {
        while let Some(message) = output_rx.recv().await {
            match message.to_json() {
                Ok(value) => clients.broadcast(value).await,
                Err(e) => warn!("Failed to serialize {} message: {}", message.kind(), e),
            }
        }
    });

    let consumer = Arc::new(RelayConsumer::new(engine.clone(), config.relays.clone()));
    let feeds: Vec<_> = [Feed::MarketData, Feed::Execution]
        .into_iter()
        .map(|feed| {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                if let Err(e) = consumer.run(feed).await {
                    error!("{:?} consumer stopped: {}", feed, e);
                }
            })
        })
        .collect();
    drop(consumer);

    info!("Signal engine running. Press Ctrl+C to stop.");

    tokio::select! {
        result = server.run() => result.context("Dashboard server failed")?,
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    for feed in feeds {
        feed.abort();
        let _ = feed.await;
    }

    match Arc::try_unwrap(engine) {
        Ok(engine) => {
            engine.shutdown().await;
            let _ = forwarder.await;
        }
        Err(_) => {
            warn!("Engine still referenced at shutdown, queued candles dropped");
            forwarder.abort();
        }
    }

    info!("Signal engine shut down");
    Ok(())
}
