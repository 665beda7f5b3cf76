//! Surface GW - OBS control from a MIDI pad controller

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use surface_gw::assembly::build_bindings;
use surface_gw::config::{AppConfig, ConfigWatcher};
use surface_gw::orchestrator::{Orchestrator, OrchestratorHandle, Reconfigure, SessionSettings};
use surface_gw::remote::ObsConnector;
use surface_gw::surface::ports::print_ports;
use surface_gw::surface::MidirBackend;
use surface_gw::relay;

/// Surface GW - Control OBS Studio from a MIDI pad controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to daily rotated files in this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<String>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    if args.list_ports {
        print_ports(&MidirBackend::new())?;
        return Ok(());
    }

    info!("Starting Surface GW...");
    info!("Configuration file: {}", args.config);

    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let _relay = initial_config.relay.as_ref().and_then(relay::spawn);

    let orchestrator = Orchestrator::new(
        SessionSettings::from_config(&initial_config.midi),
        Arc::new(ObsConnector::from_config(&initial_config.obs)),
        Arc::new(MidirBackend::new()),
        build_bindings(&initial_config.obs),
    );

    tokio::spawn(forward_config_changes(config_watcher, orchestrator.handle()));

    orchestrator.run(shutdown_signal()).await?;

    info!("Surface GW shutdown complete");
    Ok(())
}

/// Turn every valid config change into a full session reload
async fn forward_config_changes(mut watcher: ConfigWatcher, handle: OrchestratorHandle) {
    while let Some(config) = watcher.next_config().await {
        info!("📝 Configuration file changed, reloading...");
        if config.relay.is_some() {
            info!("Relay settings apply on next restart");
        }
        if let Err(e) = handle.reload(Some(reconfigure(&config))).await {
            warn!("⚠️  Failed to reload config: {}", e);
            break;
        }
    }
}

fn reconfigure(config: &AppConfig) -> Reconfigure {
    Reconfigure {
        settings: SessionSettings::from_config(&config.midi),
        connector: Arc::new(ObsConnector::from_config(&config.obs)),
        bindings: build_bindings(&config.obs),
    }
}

fn init_logging(level: &str, log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "surface-gw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
