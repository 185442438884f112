use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::{NewProxy, ProxyStatus, ProxyUpdate};

use super::{owned_proxy, owner_from};
use crate::AppState;

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    Json(state.store.list_proxies(&owner_from(&headers)).await)
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewProxy>,
) -> Result<impl IntoResponse, RubberduckError> {
    if new.name.trim().is_empty() {
        return Err(RubberduckError::Validation(vec![
            "name must not be empty".to_string(),
        ]));
    }
    let proxy = state.store.create_proxy(&owner_from(&headers), &new).await?;
    Ok((StatusCode::CREATED, Json(proxy)))
}

pub async fn get_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    let proxy = owned_proxy(&state, &headers, id).await?;
    Ok(Json(proxy))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(update): Json<ProxyUpdate>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, id).await?;
    let proxy = state.store.update_proxy(id, &update).await?;
    Ok(Json(proxy))
}

pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    let proxy = owned_proxy(&state, &headers, id).await?;
    if proxy.status == ProxyStatus::Running || state.manager.is_listening(id) {
        return Err(RubberduckError::Conflict(
            "stop the proxy before deleting it".to_string(),
        ));
    }
    state.store.delete_proxy(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, id).await?;
    let proxy = state.manager.start(id).await?;
    Ok(Json(proxy))
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    #[serde(default = "default_graceful")]
    pub graceful: bool,
}

fn default_graceful() -> bool {
    true
}

pub async fn stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Option<Json<StopRequest>>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, id).await?;
    let graceful = body.map(|Json(req)| req.graceful).unwrap_or(true);
    let proxy = state.manager.stop(id, graceful).await?;
    Ok(Json(proxy))
}
