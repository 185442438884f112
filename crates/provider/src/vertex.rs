use http::{HeaderMap, Method};
use regex::Regex;

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::ProviderTag;

use crate::{
    EndpointKind, InboundRequest, ProviderAdapter, Recognition, finalize_url, passthrough_headers,
};

/// Google Vertex AI adapter. The location path parameter selects the
/// regional host; OAuth bearer credentials flow through untouched.
pub struct VertexAdapter {
    path_re: Regex,
    base_override: Option<String>,
}

impl VertexAdapter {
    pub fn new(base_override: Option<String>) -> Self {
        Self {
            path_re: Regex::new(
                r"^(?:/v1)?/projects/([^/]+)/locations/([^/]+)/publishers/google/models/([^/:]+):generateContent$",
            )
            .expect("static pattern"),
            base_override,
        }
    }

    fn captures<'a>(&self, req: &InboundRequest<'a>) -> Option<(String, String, String)> {
        if req.method != Method::POST {
            return None;
        }
        let caps = self.path_re.captures(req.path)?;
        Some((
            caps.get(1)?.as_str().to_string(),
            caps.get(2)?.as_str().to_string(),
            caps.get(3)?.as_str().to_string(),
        ))
    }
}

impl ProviderAdapter for VertexAdapter {
    fn tag(&self) -> ProviderTag {
        ProviderTag::VertexAi
    }

    fn recognize(&self, req: &InboundRequest<'_>) -> Result<Recognition, RubberduckError> {
        let (_, _, model) = self.captures(req).ok_or_else(|| {
            RubberduckError::UnknownEndpoint(format!(
                "{} {} is not a recognized vertex-ai endpoint",
                req.method, req.path
            ))
        })?;
        Ok(Recognition {
            kind: EndpointKind::GenerateContent,
            model: Some(model),
        })
    }

    fn upstream_url(&self, req: &InboundRequest<'_>) -> Result<String, RubberduckError> {
        let (_, location, _) = self.captures(req).ok_or_else(|| {
            RubberduckError::UnknownEndpoint(format!(
                "{} {} is not a recognized vertex-ai endpoint",
                req.method, req.path
            ))
        })?;
        let path = if req.path.starts_with("/v1/") {
            req.path.to_string()
        } else {
            format!("/v1{}", req.path)
        };
        Ok(finalize_url(
            &self.base_override,
            &format!("{location}-aiplatform.googleapis.com"),
            &path,
        ))
    }

    fn authorize(&self, req: &InboundRequest<'_>) -> Result<HeaderMap, RubberduckError> {
        Ok(passthrough_headers(req.headers, &[]))
    }
}
