use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::AppState;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "db_status": "ok",
                "running_proxy_count": state.manager.running_count(),
            })),
        ),
        Err(e) => {
            tracing::error!("health check failed to reach database: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "version": env!("CARGO_PKG_VERSION"),
                    "db_status": "unreachable",
                    "running_proxy_count": state.manager.running_count(),
                })),
            )
        }
    }
}
