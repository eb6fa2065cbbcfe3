use anyhow::Context;
use clap::Parser;
use keyserver_core::{logging, FleetConfig, Outcome};
use keyserver_device::SshConnector;
use keyserver_rotation::{KeyServer, StatusAggregator};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

mod cli;
mod telemetry;

use cli::{Cli, Commands};
use telemetry::{MetricsState, PrometheusOutcomeSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Validate => {
            println!(
                "{}: {} devices, key-chain {}, interval {}h",
                cli.config.display(),
                config.device_count(),
                config.keychain,
                config.interval
            );
            Ok(())
        }
        Commands::Status => {
            let _guard = logging::init(&config.log)?;
            status(config).await
        }
        Commands::Run { once } => {
            let _guard = logging::init(&config.log)?;
            run(config, once).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<FleetConfig> {
    let config = FleetConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

async fn status(config: FleetConfig) -> anyhow::Result<()> {
    let fleet = tokio::task::spawn_blocking(move || {
        let connector = SshConnector::from_config(&config);
        StatusAggregator::new(&config, &connector).get_fleet_status()
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&fleet)?);
    Ok(())
}

async fn run(config: FleetConfig, once: bool) -> anyhow::Result<()> {
    let handle = telemetry::install_recorder()?;
    let sink = Arc::new(PrometheusOutcomeSink::new());
    let metrics_addr = config.metrics_addr;
    let connector = SshConnector::from_config(&config);
    let server = Arc::new(KeyServer::new(config, connector, Arc::clone(&sink)));

    if once {
        let cycle = Arc::clone(&server);
        let report = tokio::task::spawn_blocking(move || cycle.run_cycle()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if report.outcome == Outcome::Error {
            anyhow::bail!(
                "rotation cycle failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    info!("metrics listening on {}", metrics_addr);

    let app = telemetry::router(MetricsState { handle, sink });
    let mut http_shutdown = shutdown_rx.clone();
    let http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let rotation = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, waiting for the current cycle to finish");
    let _ = shutdown_tx.send(true);

    let cycles = rotation.await?;
    http.await??;
    info!(cycles, "keyserver stopped");
    Ok(())
}
