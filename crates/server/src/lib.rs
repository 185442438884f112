pub mod handler;
pub mod manager;
pub mod proxy_service;

use std::sync::Arc;

use axum::{Router, routing::delete, routing::get, routing::post};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use rubberduck_core::cache::Cache;
use rubberduck_core::metrics::Metrics;
use rubberduck_core::settings::Settings;
use rubberduck_core::store::Store;
use rubberduck_provider::AdapterRegistry;

use manager::ProxyManager;

/// Shared state of the management API. Proxy listeners hold their own
/// [`proxy_service::ProxyContext`]; the management listener never carries
/// proxy traffic.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub cache: Cache,
    pub registry: Arc<AdapterRegistry>,
    pub manager: Arc<ProxyManager>,
    pub metrics: Arc<Metrics>,
    pub settings: Arc<Settings>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handler::health::healthz))
        .route(
            "/proxies",
            get(handler::proxies::list).post(handler::proxies::create),
        )
        .route(
            "/proxies/{id}",
            get(handler::proxies::get_one)
                .put(handler::proxies::update)
                .delete(handler::proxies::delete),
        )
        .route("/proxies/{id}/start", post(handler::proxies::start))
        .route("/proxies/{id}/stop", post(handler::proxies::stop))
        .route(
            "/proxies/{id}/failure-config",
            get(handler::failure_config::get_config).put(handler::failure_config::put_config),
        )
        .route(
            "/proxies/{id}/failure-config/reset",
            post(handler::failure_config::reset_config),
        )
        .route("/cache", delete(handler::cache_ops::invalidate_all))
        .route("/cache/{proxy_id}", delete(handler::cache_ops::invalidate))
        .route("/cache/{proxy_id}/stats", get(handler::cache_ops::stats))
        .route("/logs", get(handler::logs::query))
        .route("/providers", get(handler::providers::list))
        .route("/dashboard/metrics", get(handler::dashboard::metrics))
        .route(
            "/dashboard/recent-activity",
            get(handler::dashboard::recent_activity),
        )
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
