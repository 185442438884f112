use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use rubberduck_core::error::RubberduckError;
use rubberduck_core::failure::FailureConfig;

use super::owned_proxy;
use crate::AppState;

pub async fn get_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    let proxy = owned_proxy(&state, &headers, id).await?;
    Ok(Json(proxy.failure_config))
}

/// Full-replace PUT. Fields absent from the body fall back to defaults,
/// and the config invariants are enforced before anything is persisted.
pub async fn put_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(config): Json<FailureConfig>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, id).await?;
    config.validate().map_err(RubberduckError::Validation)?;
    state.store.set_failure_config(id, &config).await?;
    Ok(Json(config))
}

pub async fn reset_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, RubberduckError> {
    owned_proxy(&state, &headers, id).await?;
    let config = FailureConfig::default();
    state.store.set_failure_config(id, &config).await?;
    Ok(Json(config))
}
