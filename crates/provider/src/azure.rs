use http::{HeaderMap, Method};
use regex::Regex;

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::ProviderTag;

use crate::{
    EndpointKind, InboundRequest, ProviderAdapter, Recognition, finalize_url, passthrough_headers,
};

/// Header naming the Azure resource (the `{resource}` in
/// `{resource}.openai.azure.com`). Stripped before forwarding; the
/// `api-key` credential header flows through untouched.
pub const HEADER_AZURE_RESOURCE: &str = "x-azure-resource";

pub struct AzureOpenAiAdapter {
    path_re: Regex,
    base_override: Option<String>,
}

impl AzureOpenAiAdapter {
    pub fn new(base_override: Option<String>) -> Self {
        Self {
            path_re: Regex::new(
                r"^/openai/deployments/([^/]+)/(chat/completions|completions|embeddings)$",
            )
            .expect("static pattern"),
            base_override,
        }
    }
}

impl ProviderAdapter for AzureOpenAiAdapter {
    fn tag(&self) -> ProviderTag {
        ProviderTag::AzureOpenAi
    }

    fn recognize(&self, req: &InboundRequest<'_>) -> Result<Recognition, RubberduckError> {
        let captures = (req.method == Method::POST)
            .then(|| self.path_re.captures(req.path))
            .flatten()
            .ok_or_else(|| {
                RubberduckError::UnknownEndpoint(format!(
                    "{} {} is not a recognized azure-openai endpoint",
                    req.method, req.path
                ))
            })?;

        let deployment = captures.get(1).map(|m| m.as_str().to_string());
        let kind = match captures.get(2).map(|m| m.as_str()) {
            Some("chat/completions") => EndpointKind::ChatCompletion,
            Some("completions") => EndpointKind::Completion,
            _ => EndpointKind::Embedding,
        };
        Ok(Recognition {
            kind,
            model: deployment,
        })
    }

    fn upstream_url(&self, req: &InboundRequest<'_>) -> Result<String, RubberduckError> {
        let resource = req
            .headers
            .get(HEADER_AZURE_RESOURCE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                RubberduckError::Auth(format!(
                    "azure-openai proxying requires the {HEADER_AZURE_RESOURCE} header naming \
                     your Azure OpenAI resource"
                ))
            })?;
        // api-version and any other query parameters are preserved
        Ok(finalize_url(
            &self.base_override,
            &format!("{resource}.openai.azure.com"),
            &req.path_and_query(),
        ))
    }

    fn authorize(&self, req: &InboundRequest<'_>) -> Result<HeaderMap, RubberduckError> {
        Ok(passthrough_headers(req.headers, &[HEADER_AZURE_RESOURCE]))
    }
}
