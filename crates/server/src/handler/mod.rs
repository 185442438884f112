pub mod cache_ops;
pub mod dashboard;
pub mod failure_config;
pub mod health;
pub mod logs;
pub mod proxies;
pub mod providers;

use axum::http::HeaderMap;

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::Proxy;

use crate::AppState;

/// The caller is an authenticated principal; session management lives in
/// front of this API. The owner id rides in on a header, with a default
/// for single-user deployments.
pub fn owner_from(headers: &HeaderMap) -> String {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
        .to_string()
}

/// Fetch a proxy and enforce ownership. Proxies owned by someone else are
/// indistinguishable from absent ones.
pub async fn owned_proxy(
    state: &AppState,
    headers: &HeaderMap,
    id: i64,
) -> Result<Proxy, RubberduckError> {
    let proxy = state.store.get_proxy(id).await?;
    if proxy.owner_id != owner_from(headers) {
        return Err(RubberduckError::NotFound(format!("proxy {id}")));
    }
    Ok(proxy)
}
