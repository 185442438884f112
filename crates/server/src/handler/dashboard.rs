use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use rubberduck_core::error::RubberduckError;
use rubberduck_core::metrics::aggregate;
use rubberduck_core::store::now_ms;

use crate::AppState;

/// The rolling windows the dashboard shows.
const WINDOWS: [(&str, u64); 4] = [
    ("1m", 60),
    ("15m", 900),
    ("1h", 3600),
    ("24h", 86_400),
];

pub async fn metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RubberduckError> {
    let now = now_ms();
    let mut windows = serde_json::Map::new();
    for (label, seconds) in WINDOWS {
        let since = now - (seconds as i64) * 1000;
        let entries = state.store.window_entries(None, since).await;
        windows.insert(
            label.to_string(),
            serde_json::to_value(aggregate(&entries, seconds))?,
        );
    }

    Ok(Json(json!({
        "in_flight": state.metrics.in_flight(),
        "running_proxy_count": state.manager.running_count(),
        "totals": {
            "requests": state.metrics.total_requests.load(std::sync::atomic::Ordering::Relaxed),
            "failures": state.metrics.total_failures.load(std::sync::atomic::Ordering::Relaxed),
            "uptime_seconds": state.metrics.uptime_seconds(),
        },
        "windows": windows,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityParams {
    pub limit: Option<u32>,
}

pub async fn recent_activity(
    State(state): State<AppState>,
    Query(params): Query<ActivityParams>,
) -> impl IntoResponse {
    Json(state.store.recent_logs(params.limit.unwrap_or(50)).await)
}
