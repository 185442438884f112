use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde_json::json;

use rubberduck_core::error::RubberduckError;

use super::owned_proxy;
use crate::AppState;

pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(proxy_id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, proxy_id).await?;
    Ok(Json(state.cache.stats(proxy_id).await))
}

pub async fn invalidate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(proxy_id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, proxy_id).await?;
    let removed = state.cache.invalidate(proxy_id).await;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn invalidate_all(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.cache.invalidate_all().await;
    Json(json!({ "removed": removed }))
}
