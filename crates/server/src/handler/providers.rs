use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::AppState;

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.tags())
}
