use axum::Json;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use rubberduck_core::request_log::{LogQuery, to_csv, to_jsonl};

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    pub proxy_id: Option<i64>,
    pub status_code: Option<String>,
    pub cache_hit: Option<bool>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// `csv` or `json` (JSONL) switches the response to an export.
    pub export: Option<String>,
}

pub async fn query(State(state): State<AppState>, Query(params): Query<LogsParams>) -> Response {
    let query = LogQuery {
        proxy_id: params.proxy_id,
        status_code: params.status_code,
        cache_hit: params.cache_hit,
        from: params.from,
        to: params.to,
        limit: params.limit,
        offset: params.offset,
    };
    let (entries, total) = state.store.query_logs(&query).await;

    match params.export.as_deref() {
        Some("csv") => (
            [(CONTENT_TYPE, "text/csv; charset=utf-8")],
            to_csv(&entries),
        )
            .into_response(),
        Some("json") => (
            [(CONTENT_TYPE, "application/x-ndjson")],
            to_jsonl(&entries),
        )
            .into_response(),
        _ => Json(json!({
            "items": entries,
            "total": total,
            "limit": query.limit(),
            "offset": query.offset(),
        }))
        .into_response(),
    }
}
