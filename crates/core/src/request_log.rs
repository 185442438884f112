use serde::{Deserialize, Serialize};

use crate::failure::FailureType;

/// One audit record per proxied request. Request and response bodies are
/// never stored; `prompt_hash` carries only the cache key hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub proxy_id: i64,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub latency_ms: i64,
    pub cache_hit: bool,
    pub prompt_hash: Option<String>,
    pub upstream_bytes: i64,
    pub failure_type: FailureType,
    pub response_delay_ms: i64,
    pub token_usage: Option<i64>,
    pub cost: Option<f64>,
}

/// Filters for log queries and exports.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQuery {
    pub proxy_id: Option<i64>,
    /// Either a class (`2xx`, `4xx`, `5xx`) or an exact code (`429`).
    pub status_code: Option<String>,
    pub cache_hit: Option<bool>,
    /// Millisecond timestamps, inclusive.
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl LogQuery {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

const CSV_HEADER: &str = "id,timestamp,proxy_id,client_ip,method,path,status_code,latency_ms,\
cache_hit,prompt_hash,upstream_bytes,failure_type,response_delay_ms,token_usage,cost";

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render entries as CSV; audit fields only, never bodies.
pub fn to_csv(entries: &[LogEntry]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for e in entries {
        let row = [
            e.id.to_string(),
            e.timestamp.to_string(),
            e.proxy_id.to_string(),
            csv_field(&e.client_ip),
            csv_field(&e.method),
            csv_field(&e.path),
            e.status_code.to_string(),
            e.latency_ms.to_string(),
            e.cache_hit.to_string(),
            e.prompt_hash.clone().unwrap_or_default(),
            e.upstream_bytes.to_string(),
            e.failure_type.render(),
            e.response_delay_ms.to_string(),
            e.token_usage.map(|t| t.to_string()).unwrap_or_default(),
            e.cost.map(|c| c.to_string()).unwrap_or_default(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Render entries as newline-delimited JSON.
pub fn to_jsonl(entries: &[LogEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        if let Ok(line) = serde_json::to_string(e) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}
