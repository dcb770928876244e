//! Cross-chain dispatcher service
//!
//! Serves the dispatch API over HTTP. Each `POST /dispatch` sends a message on
//! the source chain and watches the destination chain for its delivery.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use xchain_dispatcher::api;
use xchain_dispatcher::chain::{EndpointRegistry, EvmLedgerClient};
use xchain_dispatcher::config::Settings;
use xchain_dispatcher::metrics::{self, MetricsServer};
use xchain_dispatcher::DispatchCoordinator;

/// Interval between background chain health probes
const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting cross-chain dispatcher v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Signing key is required before anything touches a chain
    let private_key = settings.wallet.private_key()?;
    let wallet = EvmLedgerClient::wallet_from_key(&private_key)
        .context("Failed to load signing wallet")?;

    let registry = Arc::new(
        EndpointRegistry::from_settings(&settings, Some(wallet))
            .context("Failed to initialize chain endpoints")?,
    );
    info!("Chain endpoints initialized");

    let coordinator = Arc::new(DispatchCoordinator::from_config(
        registry.clone(),
        &settings.dispatch,
    )?);
    info!(
        "Dispatch coordinator ready (delivery timeout {}s)",
        coordinator.delivery_timeout().as_secs()
    );

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let coordinator = coordinator.clone();
        async move {
            if let Err(e) = api::run_server(config, coordinator).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let registry = registry.clone();
        async move {
            loop {
                for (chain, healthy) in registry.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain);
                    }
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS))
                    .await;
            }
        }
    });

    info!("Dispatcher is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // In-flight dispatches are dropped with their tasks, releasing subscriptions
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    if let Ok(text) = metrics::render() {
        tracing::debug!("Final metrics:\n{}", text);
    }

    info!("Dispatcher stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xchain_dispatcher=debug,hyper=warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
