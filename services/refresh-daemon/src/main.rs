//! Credential refresh daemon
//!
//! Single-binary service that:
//! 1. Loads the account pool and auto-refresh settings from disk
//! 2. Keeps every account's access token fresh on a timer
//! 3. Serves the admin API for manual refreshes and settings changes
//! 4. Stops the scheduler, drains requests and lets a running cycle persist
//!    its results on SIGTERM/SIGINT

mod admin;
mod config;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use account_pool::{AccountStore, RefreshService, SettingsStore, SystemClock};
use anyhow::{Context, Result};
use oidc_auth::OidcProvider;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;

/// How long in-flight admin requests and a running refresh cycle may take to
/// finish after a signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting refresh-daemon");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        accounts_path = %config.storage.accounts_path.display(),
        settings_path = %config.storage.settings_path.display(),
        listen_addr = %config.admin.listen_addr,
        provider_timeout_secs = config.provider.timeout_secs,
        "configuration loaded"
    );

    let store = AccountStore::load(config.storage.accounts_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load accounts from {}",
                config.storage.accounts_path.display()
            )
        })?;
    let settings = SettingsStore::load(config.storage.settings_path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load settings from {}",
                config.storage.settings_path.display()
            )
        })?;

    let http_client = reqwest::Client::builder()
        .timeout(config.provider.timeout())
        .build()
        .context("failed to build HTTP client")?;
    let provider = Arc::new(OidcProvider::new(http_client));

    let service = Arc::new(
        RefreshService::load(Arc::new(store), provider, Arc::new(SystemClock), settings)
            .await
            .context("failed to start refresh service")?,
    );

    let app = build_admin_router(
        AdminState::new(service.clone(), prometheus_handle),
        config.admin.max_connections,
    );

    let listen_addr = config.admin.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "admin API listening");

    // The drain timeout starts when the signal fires: tell the server to
    // stop accepting, then race the drain against the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // No new cycles from here. A cycle already running may hold rotated
    // refresh tokens, so it gets to write them back before the runtime stops.
    service.shutdown();
    let _ = shutdown_tx.send(());

    let drain = async {
        let served = server_handle.await;
        if service.status().cycle_in_progress {
            info!("waiting for running refresh cycle");
        }
        service.wait_idle().await;
        served
    };

    match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests and refreshes drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// If a handler cannot be installed, that branch never resolves and the
/// other signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
