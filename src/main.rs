//! Arrakis Shards - shard core for Arrakis Discord clients
//!
//! Startup order, exit codes and shutdown live here; everything else is in the
//! library. Exit codes: 70 for fatal startup failures, 69 when the remote
//! handshake fails.

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use arrakis_shards::bootstrap::{
    Bootstrap, Collaborators, HttpHandshake, RemoteHandshake, StartupFailure, StartupSignal,
    WebhookSignal, FATAL_FAILURE,
};
use arrakis_shards::cli;
use arrakis_shards::config::GatewayConfig;
use arrakis_shards::health::HealthListener;
use arrakis_shards::metrics::GatewayMetrics;
use arrakis_shards::nats::NatsConnector;
use arrakis_shards::shard::TwilightConnector;

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration first to get log level
    let mut gateway_config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info").ok();
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(FATAL_FAILURE);
        }
    };

    if let Err(e) = init_tracing(&gateway_config.log_level) {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::from(FATAL_FAILURE);
    }

    let arg = std::env::args().nth(1);
    gateway_config.watcher_port = cli::watcher_port(arg.as_deref(), gateway_config.watcher_port);

    match run(gateway_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!(error = %failure.error(), class = %failure, exit_code = failure.exit_code(), "Startup aborted");
            ExitCode::from(failure.exit_code())
        }
    }
}

async fn run(gateway_config: GatewayConfig) -> Result<(), StartupFailure> {
    let metrics = Arc::new(GatewayMetrics::install().map_err(StartupFailure::Fatal)?);
    info!("Prometheus metrics initialized");

    let collaborators = collaborators(&gateway_config, &metrics)?;
    let http_port = gateway_config.http_port;

    let mut running = Bootstrap::new(gateway_config, collaborators, metrics)
        .with_listener(Arc::new(HealthListener::new(http_port)))
        .run()
        .await?;

    tokio::select! {
        listener = running.listener_stopped() => {
            warn!(listener, "Outward listener stopped");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    running.shutdown().await;
    Ok(())
}

fn collaborators(
    config: &GatewayConfig,
    metrics: &Arc<GatewayMetrics>,
) -> Result<Collaborators, StartupFailure> {
    let handshake = match config.handshake.url.as_deref() {
        Some(url) if !config.profile.is_restricted() => {
            let remote: Arc<dyn RemoteHandshake> =
                Arc::new(HttpHandshake::new(url, config.handshake.timeout()).map_err(StartupFailure::Config)?);
            Some(remote)
        }
        _ => None,
    };

    let signal = config
        .signal
        .webhook()
        .and_then(|(id, token)| WebhookSignal::new(id, token))
        .map(|s| Arc::new(s) as Arc<dyn StartupSignal>);

    let intents = GatewayConfig::intents();
    info!(?intents, "Using Discord intents");

    Ok(Collaborators {
        handshake,
        signal,
        bus: Arc::new(NatsConnector::new(
            config.nats_url.clone(),
            config.nats_client_name.clone(),
        )),
        gateway: Arc::new(TwilightConnector::new(
            config.discord_token.clone(),
            intents,
            Arc::clone(metrics),
        )),
    })
}

fn init_tracing(log_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("arrakis_shards={log_level}").parse().context("log level")?)
                .add_directive("twilight_gateway=info".parse()?)
                .add_directive("twilight_http=warn".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
