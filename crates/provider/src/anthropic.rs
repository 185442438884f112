use http::{HeaderMap, Method};

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::ProviderTag;

use crate::{
    EndpointKind, InboundRequest, ProviderAdapter, Recognition, finalize_url, model_from_body,
    passthrough_headers,
};

const HOST: &str = "api.anthropic.com";

/// Anthropic Messages API adapter. Clients authenticate with `x-api-key`
/// plus `anthropic-version`; both flow through untouched.
pub struct AnthropicAdapter {
    base_override: Option<String>,
}

impl AnthropicAdapter {
    pub fn new(base_override: Option<String>) -> Self {
        Self { base_override }
    }
}

/// Inbound paths may or may not carry the `/v1` prefix; the upstream path
/// always does.
fn upstream_path(path: &str) -> &'static str {
    match path.trim_start_matches("/v1") {
        "/messages" => "/v1/messages",
        _ => "/v1/complete",
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Anthropic
    }

    fn recognize(&self, req: &InboundRequest<'_>) -> Result<Recognition, RubberduckError> {
        let unknown = || {
            RubberduckError::UnknownEndpoint(format!(
                "{} {} is not a recognized anthropic endpoint",
                req.method, req.path
            ))
        };
        if req.method != Method::POST {
            return Err(unknown());
        }
        let kind = match req.path.trim_start_matches("/v1") {
            "/messages" => EndpointKind::Messages,
            "/complete" => EndpointKind::Complete,
            _ => return Err(unknown()),
        };
        Ok(Recognition {
            kind,
            model: model_from_body(req.body),
        })
    }

    fn upstream_url(&self, req: &InboundRequest<'_>) -> Result<String, RubberduckError> {
        Ok(finalize_url(
            &self.base_override,
            HOST,
            upstream_path(req.path),
        ))
    }

    fn authorize(&self, req: &InboundRequest<'_>) -> Result<HeaderMap, RubberduckError> {
        Ok(passthrough_headers(req.headers, &[]))
    }
}
