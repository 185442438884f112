//! OpenAI-compatible adapter, parameterized for OpenAI itself and for
//! Deepseek (whose wire protocol is the OpenAI dialect on another host).

use http::{HeaderMap, Method};

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::ProviderTag;

use crate::{
    EndpointKind, InboundRequest, ProviderAdapter, Recognition, finalize_url, model_from_body,
    passthrough_headers,
};

pub struct OpenAiCompatAdapter {
    tag: ProviderTag,
    host: &'static str,
    base_override: Option<String>,
}

impl OpenAiCompatAdapter {
    pub fn openai(base_override: Option<String>) -> Self {
        Self {
            tag: ProviderTag::OpenAi,
            host: "api.openai.com",
            base_override,
        }
    }

    pub fn deepseek(base_override: Option<String>) -> Self {
        Self {
            tag: ProviderTag::Deepseek,
            host: "api.deepseek.com",
            base_override,
        }
    }
}

impl ProviderAdapter for OpenAiCompatAdapter {
    fn tag(&self) -> ProviderTag {
        self.tag
    }

    fn recognize(&self, req: &InboundRequest<'_>) -> Result<Recognition, RubberduckError> {
        let unknown = || {
            RubberduckError::UnknownEndpoint(format!(
                "{} {} is not a recognized {} endpoint",
                req.method, req.path, self.tag
            ))
        };
        if req.method != Method::POST {
            return Err(unknown());
        }
        let kind = match req.path {
            "/v1/chat/completions" => EndpointKind::ChatCompletion,
            "/v1/completions" => EndpointKind::Completion,
            "/v1/embeddings" => EndpointKind::Embedding,
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
            self.host,
            &req.path_and_query(),
        ))
    }

    fn authorize(&self, req: &InboundRequest<'_>) -> Result<HeaderMap, RubberduckError> {
        // Bearer credentials flow through untouched
        Ok(passthrough_headers(req.headers, &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound<'a>(
        method: &'a Method,
        path: &'a str,
        headers: &'a HeaderMap,
        body: &'a [u8],
    ) -> InboundRequest<'a> {
        InboundRequest {
            method,
            path,
            query: None,
            headers,
            body,
        }
    }

    #[test]
    fn recognizes_the_three_endpoints() {
        let adapter = OpenAiCompatAdapter::openai(None);
        let headers = HeaderMap::new();
        let body = br#"{"model":"gpt-4","messages":[]}"#;

        let rec = adapter
            .recognize(&inbound(&Method::POST, "/v1/chat/completions", &headers, body))
            .unwrap();
        assert_eq!(rec.kind, EndpointKind::ChatCompletion);
        assert_eq!(rec.model.as_deref(), Some("gpt-4"));

        assert_eq!(
            adapter
                .recognize(&inbound(&Method::POST, "/v1/completions", &headers, b"{}"))
                .unwrap()
                .kind,
            EndpointKind::Completion
        );
        assert_eq!(
            adapter
                .recognize(&inbound(&Method::POST, "/v1/embeddings", &headers, b"{}"))
                .unwrap()
                .kind,
            EndpointKind::Embedding
        );
    }

    #[test]
    fn rejects_unknown_paths_and_methods() {
        let adapter = OpenAiCompatAdapter::openai(None);
        let headers = HeaderMap::new();
        assert!(matches!(
            adapter.recognize(&inbound(&Method::POST, "/v1/images", &headers, b"{}")),
            Err(RubberduckError::UnknownEndpoint(_))
        ));
        assert!(
            adapter
                .recognize(&inbound(&Method::GET, "/v1/chat/completions", &headers, b""))
                .is_err()
        );
    }

    #[test]
    fn upstream_url_targets_provider_host() {
        let headers = HeaderMap::new();
        let req = inbound(&Method::POST, "/v1/chat/completions", &headers, b"{}");
        assert_eq!(
            OpenAiCompatAdapter::openai(None).upstream_url(&req).unwrap(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            OpenAiCompatAdapter::deepseek(None).upstream_url(&req).unwrap(),
            "https://api.deepseek.com/v1/chat/completions"
        );
    }

    #[test]
    fn authorize_passes_bearer_through() {
        let adapter = OpenAiCompatAdapter::openai(None);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-test".parse().unwrap());
        headers.insert("host", "localhost:8001".parse().unwrap());
        let req = inbound(&Method::POST, "/v1/chat/completions", &headers, b"{}");

        let out = adapter.authorize(&req).unwrap();
        assert_eq!(out.get("authorization").unwrap(), "Bearer sk-test");
        assert!(!out.contains_key("host"));
    }
}
