//! Application assembly: store, registry, lifecycle manager, and the
//! management API listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use rubberduck_core::cache::Cache;
use rubberduck_core::metrics::Metrics;
use rubberduck_core::rate_limit::RateLimiter;
use rubberduck_core::settings::Settings;
use rubberduck_core::store::Store;
use rubberduck_provider::{RegistryOptions, build_registry};
use rubberduck_server::manager::ProxyManager;
use rubberduck_server::{AppState, build_router};

use crate::cli::Cli;

pub async fn run(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings {
        host: cli.host.clone(),
        port: cli.port,
        database: cli.database.clone(),
        aws_region: cli.aws_region.clone(),
    };

    // A store failure at boot is fatal to the process
    let store = Arc::new(
        Store::open(&settings.database)
            .await
            .with_context(|| format!("failed to open database at {}", settings.database))?,
    );
    let cache = Cache::new(store.clone());
    let registry = Arc::new(build_registry(RegistryOptions {
        aws_region: settings.aws_region.clone(),
        upstream_override: None,
    }));
    let limiter = Arc::new(RateLimiter::new());
    let metrics = Arc::new(Metrics::new());
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("failed to build upstream HTTP client")?;

    let manager = Arc::new(ProxyManager::new(
        store.clone(),
        cache.clone(),
        registry.clone(),
        limiter,
        metrics.clone(),
        http,
    ));

    // Re-start every proxy persisted as running; failures leave status=error
    manager.recover().await;

    let state = AppState {
        store,
        cache,
        registry,
        manager: manager.clone(),
        metrics,
        settings: Arc::new(settings.clone()),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind management API on {addr}"))?;
    tracing::info!("management API listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("draining running proxies");
    manager.shutdown().await;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
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
