//! Brego telemetry server.
//!
//! Run with: `cargo run -p brego-service -- --simulate`

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use brego_service::config::{SamplerConfig, SimulatedConfig};
use brego_service::{Config, ProducerConfig, Supervisor, producers, signals};
use brego_store::Store;
use brego_types::wire::WireFormat;

/// Brego - sensor bus with socket, WebSocket and SQLite sinks.
#[derive(Parser, Debug)]
#[command(name = "brego")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Broadcast endpoint, `unix:<path>` or `tcp:<host:port>` (overrides config).
    #[arg(short, long)]
    broadcast_endpoint: Option<String>,

    /// Broadcast line format: triples or records (overrides config).
    #[arg(short, long)]
    format: Option<WireFormat>,

    /// WebSocket bind address (overrides config).
    #[arg(short, long)]
    websocket_bind: Option<String>,

    /// Do not persist readings.
    #[arg(long)]
    no_storage: bool,

    /// Disable the WebSocket server.
    #[arg(long)]
    no_websocket: bool,

    /// Replace configured producers with simulated sensors.
    #[arg(long)]
    simulate: bool,

    /// Periodically log subscriber queue sizes.
    #[arg(long)]
    report_status: bool,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("brego_service={level}").parse()?)
                .add_directive(format!("brego_core={level}").parse()?)
                .add_directive(format!("brego_store={level}").parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_else(|e| {
            warn!("Ignoring unreadable default config: {}", e);
            Config::default()
        }),
    };
    apply_overrides(&mut config, &args);

    if config.producers.is_empty() {
        warn!("No producers configured; only connected clients will be served");
    }
    let producers = producers::build_producers(&config.producers)?;

    let shutdown = signals::shutdown_signals()?;
    let restart = signals::restart_signals()?;

    if config.storage.enabled {
        let store = Store::open(&config.storage.path)?;
        Supervisor::builder()
            .config(config)
            .store(store)
            .producers(producers)
            .build()
            .await?
            .run(shutdown, restart)
            .await?;
    } else {
        info!("Storage disabled");
        Supervisor::<Store>::builder()
            .config(config)
            .producers(producers)
            .build()
            .await?
            .run(shutdown, restart)
            .await?;
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(path) = &args.database {
        config.storage.path = path.clone();
    }
    if let Some(endpoint) = &args.broadcast_endpoint {
        config.broadcast.endpoint = endpoint.clone();
    }
    if let Some(format) = args.format {
        config.broadcast.format = format;
    }
    if let Some(bind) = &args.websocket_bind {
        config.websocket.bind = bind.clone();
    }
    if args.no_storage {
        config.storage.enabled = false;
    }
    if args.no_websocket {
        config.websocket.enabled = false;
    }
    if args.report_status {
        config.status.enabled = true;
    }
    if args.simulate {
        config.producers = vec![
            ProducerConfig::Simulated(SimulatedConfig::default()),
            ProducerConfig::Sampler(SamplerConfig::default()),
        ];
    }
}
