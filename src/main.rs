//! Ingest Dump - minimal HTTP ingestion server
//!
//! Streams every POSTed body into a file named after the request path.

use clap::{Parser, ValueEnum};
use ingest_dump::{config::Config, metrics::server::MetricsServer, server::IngestServer};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Ingest Dump - stream HTTP POST bodies to files
#[derive(Parser, Debug)]
#[command(name = "ingest-dump")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the configuration file)
    port: Option<u16>,

    /// Path to an optional YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Track uploads without writing anything to disk
    #[arg(long)]
    no_write: bool,

    /// Directory uploads are written into
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(args: &Args) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    let registry = tracing_subscriber::registry().with(env_filter);
    match args.log_format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init(),
    }
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    if let Some(port) = args.port {
        config.set_port(port)?;
    }
    if args.no_write {
        config.storage.enabled = false;
    }
    if let Some(dir) = &args.output_dir {
        config.storage.output_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Signal SIGINT received, closing..."),
        _ = terminate => info!("Signal SIGTERM received, closing..."),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting Ingest Dump v{}", ingest_dump::VERSION);

    let config = build_config(&args)?;
    if !config.storage.enabled {
        info!("Persistence disabled, uploads are tracked but discarded");
    }

    let server = IngestServer::new(config.clone()).await?;

    let mut metrics_server = if config.metrics.enabled {
        let mut server =
            MetricsServer::from_config(&config.metrics, server.local_addr().ip());
        server.start().await?;
        Some(server)
    } else {
        None
    };

    server.run_until(shutdown_signal()).await?;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }

    Ok(())
}
