//! Proxy lifecycle manager: binds and unbinds per-proxy listeners, recovers
//! persisted-running proxies at boot, and drains everything on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use rubberduck_core::cache::Cache;
use rubberduck_core::error::RubberduckError;
use rubberduck_core::metrics::Metrics;
use rubberduck_core::model::{Proxy, ProxyStatus};
use rubberduck_core::rate_limit::RateLimiter;
use rubberduck_core::store::Store;
use rubberduck_provider::AdapterRegistry;

use crate::proxy_service::{ProxyContext, proxy_router};

/// How long a graceful stop waits for in-flight requests before aborting
/// the listener task.
const GRACEFUL_STOP_DEADLINE: Duration = Duration::from_secs(30);

struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ProxyManager {
    store: Arc<Store>,
    cache: Cache,
    registry: Arc<AdapterRegistry>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
    listeners: DashMap<i64, ListenerHandle>,
}

impl ProxyManager {
    pub fn new(
        store: Arc<Store>,
        cache: Cache,
        registry: Arc<AdapterRegistry>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            limiter,
            metrics,
            http,
            listeners: DashMap::new(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_listening(&self, proxy_id: i64) -> bool {
        self.listeners.contains_key(&proxy_id)
    }

    /// Bind the proxy's port and start serving. A bind failure persists
    /// `status = error` and surfaces the bind error.
    pub async fn start(&self, proxy_id: i64) -> Result<Proxy, RubberduckError> {
        let proxy = self.store.get_proxy(proxy_id).await?;
        if self.listeners.contains_key(&proxy_id) {
            return Ok(proxy);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], proxy.port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.store
                    .set_proxy_status(proxy_id, ProxyStatus::Error)
                    .await?;
                return Err(RubberduckError::Conflict(format!(
                    "failed to bind port {}: {e}",
                    proxy.port
                )));
            }
        };

        let context = ProxyContext {
            proxy_id,
            provider: proxy.provider,
            store: self.store.clone(),
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            limiter: self.limiter.clone(),
            metrics: self.metrics.clone(),
            http: self.http.clone(),
        };
        let app = proxy_router(context);

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let port = proxy.port;
        let task = tokio::spawn(async move {
            let wait = async move {
                let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
            };
            if let Err(e) =
                axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                    .with_graceful_shutdown(wait)
                    .await
            {
                tracing::error!(proxy_id, port, "proxy listener failed: {e}");
            }
        });

        // Restarted proxies get a fresh rate-limit bucket
        self.limiter.reset(proxy_id);
        self.listeners
            .insert(proxy_id, ListenerHandle { shutdown, task });
        self.store
            .set_proxy_status(proxy_id, ProxyStatus::Running)
            .await?;
        tracing::info!(proxy_id, port, provider = %proxy.provider, "proxy started");
        self.store.get_proxy(proxy_id).await
    }

    /// Stop accepting connections. Graceful stops drain in-flight requests
    /// up to [`GRACEFUL_STOP_DEADLINE`]; forced stops abort immediately.
    pub async fn stop(&self, proxy_id: i64, graceful: bool) -> Result<Proxy, RubberduckError> {
        // NotFound check before touching the listener map
        self.store.get_proxy(proxy_id).await?;

        if let Some((_, handle)) = self.listeners.remove(&proxy_id) {
            if graceful {
                let _ = handle.shutdown.send(true);
                let abort = handle.task.abort_handle();
                if tokio::time::timeout(GRACEFUL_STOP_DEADLINE, handle.task)
                    .await
                    .is_err()
                {
                    tracing::warn!(proxy_id, "graceful stop deadline elapsed, aborting listener");
                    abort.abort();
                }
            } else {
                handle.task.abort();
            }
        }

        self.store
            .set_proxy_status(proxy_id, ProxyStatus::Stopped)
            .await?;
        tracing::info!(proxy_id, "proxy stopped");
        self.store.get_proxy(proxy_id).await
    }

    /// Boot recovery: re-start every proxy persisted as `running`. Bind
    /// failures are logged and leave `status = error`; they never abort
    /// boot.
    pub async fn recover(&self) {
        let persisted = self
            .store
            .list_proxies_with_status(ProxyStatus::Running)
            .await;
        for proxy in persisted {
            match self.start(proxy.id).await {
                Ok(started) => {
                    tracing::info!(
                        proxy_id = started.id,
                        port = started.port,
                        "recovered proxy at boot"
                    );
                }
                Err(e) => {
                    tracing::warn!(proxy_id = proxy.id, "boot recovery failed: {e}");
                }
            }
        }
    }

    /// Graceful stop for every running proxy, in parallel. Called on
    /// process shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.listeners.iter().map(|entry| *entry.key()).collect();
        let stops = ids.into_iter().map(|id| self.stop(id, true));
        for result in futures::future::join_all(stops).await {
            if let Err(e) = result {
                tracing::warn!("shutdown stop failed: {e}");
            }
        }
    }
}
