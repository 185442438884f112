//! The per-proxy request handler: failure simulation, cache consultation,
//! upstream forwarding, response delay, and audit logging for one inbound
//! request.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use uuid::Uuid;

use rubberduck_core::cache::{Cache, cache_key};
use rubberduck_core::error::RubberduckError;
use rubberduck_core::failure::FailureType;
use rubberduck_core::metrics::Metrics;
use rubberduck_core::model::{CacheEntry, ProviderTag};
use rubberduck_core::rate_limit::RateLimiter;
use rubberduck_core::simulator::{self, Synthetic, Verdict};
use rubberduck_core::store::{Store, now_ms};
use rubberduck_core::request_log::LogEntry;
use rubberduck_provider::{AdapterRegistry, InboundRequest};

/// Inbound request bodies larger than this are rejected outright.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Default deadline for buffered upstream calls. Streaming calls get only a
/// connect timeout so long-lived streams are not cut off.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one proxy listener needs to serve a request. Cloned per
/// request; all members are shared handles.
#[derive(Clone)]
pub struct ProxyContext {
    pub proxy_id: i64,
    pub provider: ProviderTag,
    pub store: Arc<Store>,
    pub cache: Cache,
    pub registry: Arc<AdapterRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
}

/// Every method and path lands in the one fallback handler; the provider
/// adapter decides what is recognized.
pub fn proxy_router(ctx: ProxyContext) -> Router {
    Router::new().fallback(handle).with_state(ctx)
}

/// What the pipeline produced for one request, carried to the delay and
/// logging steps.
struct Outcome {
    response: Response,
    status: u16,
    failure_type: FailureType,
    cache_hit: bool,
    prompt_hash: Option<String>,
    upstream_bytes: i64,
    token_usage: Option<i64>,
    /// The response-delay stage only applies to responses materialized from
    /// cache or upstream, not to simulator or adapter errors.
    delay_applies: bool,
}

impl Outcome {
    fn error(err: RubberduckError) -> Self {
        let status = err.status_code().as_u16();
        let failure_type = match err {
            RubberduckError::Upstream(_) | RubberduckError::UpstreamTimeout(_) => {
                FailureType::UpstreamError
            }
            _ => FailureType::None,
        };
        Self {
            response: err.into_response(),
            status,
            failure_type,
            cache_hit: false,
            prompt_hash: None,
            upstream_bytes: 0,
            token_usage: None,
            delay_applies: false,
        }
    }
}

async fn handle(
    State(ctx): State<ProxyContext>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    let started = Instant::now();
    let _guard = ctx.metrics.clone().begin_request();
    let request_id = Uuid::new_v4();

    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();
    let headers = req.headers().clone();

    let body = match axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                [("content-type", "application/json")],
                r#"{"error":{"message":"request body too large","type":"invalid_request_error"}}"#,
            )
                .into_response();
        }
    };

    // Fresh failure-config snapshot per request: a PUT takes effect on the
    // next request, never mid-flight.
    let proxy = match ctx.store.get_proxy(ctx.proxy_id).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let config = proxy.failure_config;

    // Stages 1-4 of the failure pipeline
    let outcome = match simulator::evaluate(&config, ctx.proxy_id, peer.ip(), &ctx.limiter) {
        Verdict::Pass => {
            forward(
                &ctx,
                &method,
                &path,
                uri.query(),
                &headers,
                &body,
            )
            .await
        }
        Verdict::Reject(synthetic) => synthetic_outcome(synthetic),
        Verdict::TimeoutAfter(duration) => {
            tokio::time::sleep(duration).await;
            synthetic_outcome(simulator::timeout_response())
        }
        Verdict::HangForever => {
            // Resolved only by client disconnect, which drops this task.
            tracing::debug!(%request_id, proxy_id = ctx.proxy_id, "hanging request indefinitely");
            std::future::pending::<()>().await;
            unreachable!("pending future never resolves")
        }
    };

    // Response-delay stage
    let mut response_delay_ms = 0i64;
    if outcome.delay_applies
        && let Some(delay) = simulator::draw_response_delay(&config, outcome.cache_hit)
    {
        tokio::time::sleep(delay).await;
        response_delay_ms = delay.as_millis() as i64;
    }

    if outcome.failure_type != FailureType::None || outcome.status >= 400 {
        ctx.metrics.record_failure();
    }

    let entry = LogEntry {
        id: 0,
        timestamp: now_ms(),
        proxy_id: ctx.proxy_id,
        client_ip: peer.ip().to_string(),
        method: method.to_string(),
        path: path.clone(),
        status_code: outcome.status,
        latency_ms: started.elapsed().as_millis() as i64,
        cache_hit: outcome.cache_hit,
        prompt_hash: outcome.prompt_hash,
        upstream_bytes: outcome.upstream_bytes,
        failure_type: outcome.failure_type,
        response_delay_ms,
        token_usage: outcome.token_usage,
        cost: None,
    };
    // A failed append aborts the process inside the store layer
    ctx.store.append_log(&entry).await;
    tracing::info!(
        %request_id,
        proxy_id = ctx.proxy_id,
        method = %method,
        path = %path,
        status = outcome.status,
        cache_hit = outcome.cache_hit,
        failure = %outcome.failure_type,
        latency_ms = entry.latency_ms,
        "proxied request"
    );

    outcome.response
}

/// Steps 3-5 of the per-request algorithm: cache lookup, upstream call,
/// cache write.
async fn forward(
    ctx: &ProxyContext,
    method: &http::Method,
    path: &str,
    query: Option<&str>,
    headers: &http::HeaderMap,
    body: &Bytes,
) -> Outcome {
    let Some(adapter) = ctx.registry.get(ctx.provider) else {
        return Outcome::error(RubberduckError::Internal(format!(
            "no adapter for provider {}",
            ctx.provider
        )));
    };

    let inbound = InboundRequest {
        method,
        path,
        query,
        headers,
        body,
    };

    let recognition = match adapter.recognize(&inbound) {
        Ok(r) => r,
        Err(e) => return Outcome::error(e),
    };
    let streaming = recognition.kind.is_streaming() || body_requests_streaming(body);

    let normalized = adapter.normalize(body);
    let key = cache_key(ctx.provider, recognition.kind.as_str(), &normalized);

    // Streaming requests bypass the cache in both directions: a buffered
    // body would be the wrong wire shape for a streaming client.
    if !streaming
        && let Some(entry) = ctx.cache.get(ctx.proxy_id, &key).await
    {
        return cached_outcome(entry, key);
    }

    let url = match adapter.upstream_url(&inbound) {
        Ok(u) => u,
        Err(e) => return Outcome::error(e),
    };
    let upstream_headers = match adapter.authorize(&inbound) {
        Ok(h) => h,
        Err(e) => return Outcome::error(e),
    };

    if streaming {
        // Forward incrementally; never buffer the whole stream into memory.
        // No overall deadline so long-lived streams are not severed.
        let upstream = match ctx
            .http
            .request(method.clone(), url.as_str())
            .headers(upstream_headers)
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Outcome::error(e.into()),
        };
        let status = upstream.status();
        let stored_headers = response_headers(&upstream);

        let mut builder = Response::builder().status(status.as_u16());
        for (name, value) in &stored_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());
        return Outcome {
            response,
            status: status.as_u16(),
            failure_type: FailureType::None,
            cache_hit: false,
            prompt_hash: Some(key),
            upstream_bytes: 0,
            token_usage: None,
            delay_applies: true,
        };
    }

    // The buffered fetch runs on its own task: a client disconnect cancels
    // this handler, but a 2xx that arrives afterwards is still cached.
    let fetch = tokio::spawn(fetch_and_cache(
        ctx.clone(),
        method.clone(),
        url,
        upstream_headers,
        body.clone(),
        key.clone(),
    ));
    let (status, stored_headers, bytes, token_usage) = match fetch.await {
        Ok(Ok(fetched)) => fetched,
        Ok(Err(e)) => return Outcome::error(e),
        Err(e) => return Outcome::error(RubberduckError::Internal(format!("upstream task: {e}"))),
    };

    // Upstream errors are passed through byte-for-byte unless the adapter
    // explicitly declares a translation.
    let body_out = if status >= 400 {
        adapter
            .translate_error(status, &bytes)
            .unwrap_or_else(|| bytes.clone())
    } else {
        bytes.clone()
    };

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &stored_headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder
        .body(Body::from(body_out))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response());

    Outcome {
        response,
        status,
        failure_type: FailureType::None,
        cache_hit: false,
        prompt_hash: Some(key),
        upstream_bytes: bytes.len() as i64,
        token_usage,
        delay_applies: true,
    }
}

/// Issue the upstream call, buffer the body, and store 2xx responses in the
/// cache. Runs detached from the client connection.
async fn fetch_and_cache(
    ctx: ProxyContext,
    method: http::Method,
    url: String,
    headers: http::HeaderMap,
    body: Bytes,
    key: String,
) -> Result<(u16, Vec<(String, String)>, Bytes, Option<i64>), RubberduckError> {
    let upstream = ctx
        .http
        .request(method, url.as_str())
        .headers(headers)
        .body(body.to_vec())
        .timeout(UPSTREAM_TIMEOUT)
        .send()
        .await?;

    let status = upstream.status();
    let stored_headers = response_headers(&upstream);
    let bytes = upstream.bytes().await?;

    let mut token_usage = None;
    if status.is_success() {
        token_usage = parse_token_usage(&bytes);
        ctx.cache
            .put(ctx.proxy_id, &key, status.as_u16(), &stored_headers, &bytes)
            .await;
    }

    Ok((status.as_u16(), stored_headers, bytes, token_usage))
}

fn synthetic_outcome(synthetic: Synthetic) -> Outcome {
    let status = synthetic.status;
    let failure_type = synthetic.failure_type;
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
    for (name, value) in &synthetic.headers {
        builder = builder.header(*name, value.as_str());
    }
    let response = builder
        .body(Body::from(synthetic.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    Outcome {
        response,
        status,
        failure_type,
        cache_hit: false,
        prompt_hash: None,
        upstream_bytes: 0,
        token_usage: None,
        delay_applies: false,
    }
}

fn cached_outcome(entry: CacheEntry, key: String) -> Outcome {
    let status = entry.status_code;
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
    for (name, value) in &entry.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder
        .body(Body::from(entry.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    Outcome {
        response,
        status,
        failure_type: FailureType::None,
        cache_hit: true,
        prompt_hash: Some(key),
        upstream_bytes: 0,
        token_usage: None,
        delay_applies: true,
    }
}

/// OpenAI-style and Anthropic-style requests opt into streaming with a
/// top-level `"stream": true`.
fn body_requests_streaming(body: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("stream").and_then(|s| s.as_bool()))
        .unwrap_or(false)
}

/// Response headers stored in cache and echoed to clients: lowercased,
/// minus framing headers the server recomputes.
fn response_headers(resp: &reqwest::Response) -> Vec<(String, String)> {
    resp.headers()
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            if matches!(
                name.as_str(),
                "content-length" | "transfer-encoding" | "connection"
            ) {
                return None;
            }
            value.to_str().ok().map(|v| (name, v.to_string()))
        })
        .collect()
}

/// Best-effort token accounting from a 2xx JSON body. Covers the OpenAI
/// (`usage.total_tokens`), Anthropic/Bedrock (`usage.input_tokens` +
/// `usage.output_tokens`), and Vertex (`usageMetadata.totalTokenCount`)
/// shapes.
fn parse_token_usage(body: &[u8]) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    if let Some(usage) = value.get("usage") {
        if let Some(total) = usage.get("total_tokens").and_then(|t| t.as_i64()) {
            return Some(total);
        }
        let input = usage.get("input_tokens").and_then(|t| t.as_i64());
        let output = usage.get("output_tokens").and_then(|t| t.as_i64());
        if input.is_some() || output.is_some() {
            return Some(input.unwrap_or(0) + output.unwrap_or(0));
        }
    }
    value
        .get("usageMetadata")
        .and_then(|u| u.get("totalTokenCount"))
        .and_then(|t| t.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_flag_detection() {
        assert!(body_requests_streaming(br#"{"stream":true}"#));
        assert!(!body_requests_streaming(br#"{"stream":false}"#));
        assert!(!body_requests_streaming(br#"{"model":"gpt-4"}"#));
        assert!(!body_requests_streaming(b"not json"));
    }

    #[test]
    fn token_usage_shapes() {
        assert_eq!(
            parse_token_usage(br#"{"usage":{"total_tokens":30}}"#),
            Some(30)
        );
        assert_eq!(
            parse_token_usage(br#"{"usage":{"input_tokens":10,"output_tokens":5}}"#),
            Some(15)
        );
        assert_eq!(
            parse_token_usage(br#"{"usageMetadata":{"totalTokenCount":7}}"#),
            Some(7)
        );
        assert_eq!(parse_token_usage(br#"{"choices":[]}"#), None);
        assert_eq!(parse_token_usage(b"oops"), None);
    }

    #[test]
    fn error_outcome_maps_upstream_failures() {
        let outcome = Outcome::error(RubberduckError::Upstream("refused".to_string()));
        assert_eq!(outcome.status, 502);
        assert_eq!(outcome.failure_type, FailureType::UpstreamError);
        assert!(!outcome.delay_applies);

        let outcome = Outcome::error(RubberduckError::Auth("no creds".to_string()));
        assert_eq!(outcome.status, 401);
        assert_eq!(outcome.failure_type, FailureType::None);
    }
}
