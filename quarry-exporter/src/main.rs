//! Quarry exporter binary.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use quarry_common::{init_tracing, Config};
use quarry_exporter::{create_router, ApiState, CollectorService, HttpServer};

/// Configuration-driven Prometheus exporter.
#[derive(Parser, Debug)]
#[command(name = "quarry-exporter")]
#[command(about = "Collect scalar metrics from MySQL, IoTDB, Redis and HTTP APIs")]
#[command(version)]
struct Args {
    /// Path to the configuration file (JSON5).
    #[arg(short, long, default_value = "config.json5")]
    config: String,

    /// Listen address override, host:port.
    #[arg(long)]
    listen: Option<String>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;

    if let Some(listen) = &args.listen {
        let addr: SocketAddr = listen
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid --listen address '{listen}': {e}"))?;
        config.prometheus.listen_address = addr.ip().to_string();
        config.prometheus.listen_port = addr.port();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    init_tracing(&config.logging)?;
    info!(config = %args.config, "Starting Quarry exporter");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = CollectorService::new(config.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize collection service: {e}"))?;

    let listen_addr: SocketAddr = config
        .prometheus
        .listen_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))?;
    let api_state = ApiState::new(service.clone(), args.config.clone());
    let router = create_router(service.clone(), api_state);
    let server = HttpServer::bind(router, listen_addr).await?;

    let scheduler_task = tokio::spawn(service.clone().run(shutdown_rx.clone()));
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(err) = server.run(http_shutdown).await {
            error!(error = %err, "HTTP server error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = scheduler_task.await;
        let _ = http_task.await;
    })
    .await;

    service.close().await;
    info!("Exporter stopped");
    Ok(())
}
