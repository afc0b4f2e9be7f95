//! hapcand: the HAPCAN <-> MQTT gateway daemon.

mod can_io;
mod dispatch;
mod mqtt_io;
mod periodic;
mod supervisor;
mod tcp_server;

use anyhow::Result;
use buffers::Link;
use can_io::CanEndpoint;
use clap::Parser;
use config::GatewayConfig;
use engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use supervisor::Restart;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hapcand", about = "HAPCAN <-> MQTT gateway daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config/hapcan.json")]
    config: PathBuf,

    /// Log directory for rolling text logs (stdout only when omitted)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The guard must be held for the lifetime of the program so file logs
    // are flushed on shutdown.
    let _log_guard = init_logging(args.log_dir.as_deref(), &args.log_level);

    let config = match GatewayConfig::load(&args.config) {
        Ok(config) => {
            info!(path = %args.config.display(), "Loaded configuration");
            config
        }
        Err(error) => {
            warn!(%error, "Configuration unusable, starting with defaults");
            GatewayConfig::default()
        }
    };

    let engine = Engine::new(config);
    let restart = Arc::new(Restart::default());

    // CAN endpoint: sync socket on dedicated worker threads.
    let can = Arc::new(CanEndpoint::new());
    can_io::spawn_workers(engine.clone(), can.clone());

    // MQTT client and programmer socket server.
    let mqtt_link = Arc::new(Link::new());
    tokio::spawn(mqtt_io::run(
        engine.clone(),
        mqtt_link.clone(),
        restart.clone(),
    ));
    let tcp_link = Arc::new(Link::new());
    tokio::spawn(tcp_server::run(
        engine.clone(),
        tcp_link.clone(),
        restart.clone(),
    ));

    // Dispatchers between the queues.
    tokio::spawn(dispatch::run_can_dispatcher(engine.clone()));
    tokio::spawn(dispatch::run_mqtt_dispatcher(engine.clone()));
    tokio::spawn(dispatch::run_socket_dispatcher(engine.clone()));

    // Periodic drivers and the configuration watcher.
    tokio::spawn(periodic::run_rtc(engine.clone(), can.clone()));
    tokio::spawn(periodic::run_maintenance(engine.clone(), can.clone()));
    tokio::spawn(supervisor::run_config_watcher(
        engine.clone(),
        args.config.clone(),
        restart.clone(),
    ));

    info!("Gateway running");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

/// Initialize logging to stdout plus an optional daily rolling file.
fn init_logging(
    log_dir: Option<&std::path::Path>,
    level: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("hapcand={level},engine={level},inventory={level}"))
    });
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);

    let writer = log_dir.and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "hapcand.log");
            Some(tracing_appender::non_blocking(appender))
        }
        Err(error) => {
            eprintln!("cannot create log directory {}: {error}", dir.display());
            None
        }
    });

    match writer {
        Some((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            None
        }
    }
}
