pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod normalize;
pub mod openai;
pub mod sigv4;
pub mod vertex;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::ProviderTag;

/// Abstract label for a provider operation, assigned at recognition time.
/// Part of the cache key, so renaming a variant's string invalidates
/// existing cache rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    ChatCompletion,
    Completion,
    Embedding,
    Messages,
    Complete,
    Invoke,
    InvokeStream,
    FoundationModels,
    CustomModels,
    GenerateContent,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCompletion => "chat_completion",
            Self::Completion => "completion",
            Self::Embedding => "embedding",
            Self::Messages => "messages",
            Self::Complete => "complete",
            Self::Invoke => "invoke",
            Self::InvokeStream => "invoke_stream",
            Self::FoundationModels => "foundation_models",
            Self::CustomModels => "custom_models",
            Self::GenerateContent => "generate_content",
        }
    }

    /// Endpoints whose responses must be forwarded incrementally, never
    /// buffered or cached.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::InvokeStream)
    }
}

/// Result of classifying an inbound path.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub kind: EndpointKind,
    pub model: Option<String>,
}

/// The pieces of an inbound request an adapter operates on.
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    /// Path only, no query string.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

impl InboundRequest<'_> {
    /// Path plus the original query string, as sent upstream.
    pub fn path_and_query(&self) -> String {
        match self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.to_string(),
        }
    }
}

/// One adapter per supported vendor, dispatched by `proxy.provider_tag`.
/// All adapters are compiled in; there is no runtime plugin loading.
pub trait ProviderAdapter: Send + Sync {
    fn tag(&self) -> ProviderTag;

    /// Classify the inbound path (and, where the wire format carries it,
    /// extract the model id).
    fn recognize(&self, req: &InboundRequest<'_>) -> Result<Recognition, RubberduckError>;

    /// Canonical byte string for cache-key hashing. The default covers
    /// every JSON-bodied provider.
    fn normalize(&self, body: &[u8]) -> Vec<u8> {
        normalize::canonical_body(body)
    }

    /// Compute the real provider URL for this inbound request.
    fn upstream_url(&self, req: &InboundRequest<'_>) -> Result<String, RubberduckError>;

    /// Produce the headers sent upstream. Pass-through providers forward
    /// credential headers untouched; Bedrock re-signs. Credentials are
    /// never logged or stored.
    fn authorize(&self, req: &InboundRequest<'_>) -> Result<HeaderMap, RubberduckError>;

    /// Rewrite a provider-specific upstream error body where a client SDK
    /// expects a different shape. The general rule is pass-through; only
    /// adapters that explicitly declare translation return `Some`.
    fn translate_error(&self, _status: u16, _body: &Bytes) -> Option<Bytes> {
        None
    }
}

/// Headers that must not be forwarded upstream: hop-by-hop headers, the
/// inbound host, and lengths reqwest recomputes.
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "accept-encoding",
];

/// Copy inbound headers for upstream forwarding, dropping hop-by-hop
/// headers plus any caller-listed extras (e.g. synthetic credential
/// headers an adapter consumes).
pub(crate) fn passthrough_headers(inbound: &HeaderMap, extra_skips: &[&str]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in inbound.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if SKIPPED_HEADERS.contains(&lower.as_str()) || extra_skips.contains(&lower.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Best-effort extraction of the `model` field from a JSON request body,
/// for providers whose wire format carries it in the payload.
pub(crate) fn model_from_body(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("model")?
        .as_str()
        .map(str::to_string)
}

/// Options for building the adapter registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Region used for Bedrock SigV4 re-signing and host synthesis.
    pub aws_region: String,
    /// When set, replaces every adapter's `https://{host}` with this base.
    /// Used by tests to point adapters at a local stub upstream.
    pub upstream_override: Option<String>,
}

pub struct AdapterRegistry {
    adapters: HashMap<ProviderTag, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn get(&self, tag: ProviderTag) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&tag).cloned()
    }

    /// Provider tags exposed via `GET /providers`.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.adapters.keys().map(|t| t.as_str()).collect();
        tags.sort_unstable();
        tags
    }
}

/// Build the compiled-in adapter set.
pub fn build_registry(options: RegistryOptions) -> AdapterRegistry {
    let base = options.upstream_override;
    let region = if options.aws_region.is_empty() {
        "us-east-1".to_string()
    } else {
        options.aws_region
    };

    let mut adapters: HashMap<ProviderTag, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert(
        ProviderTag::OpenAi,
        Arc::new(openai::OpenAiCompatAdapter::openai(base.clone())),
    );
    adapters.insert(
        ProviderTag::Deepseek,
        Arc::new(openai::OpenAiCompatAdapter::deepseek(base.clone())),
    );
    adapters.insert(
        ProviderTag::Anthropic,
        Arc::new(anthropic::AnthropicAdapter::new(base.clone())),
    );
    adapters.insert(
        ProviderTag::AzureOpenAi,
        Arc::new(azure::AzureOpenAiAdapter::new(base.clone())),
    );
    adapters.insert(
        ProviderTag::Bedrock,
        Arc::new(bedrock::BedrockAdapter::new(region, base.clone())),
    );
    adapters.insert(
        ProviderTag::VertexAi,
        Arc::new(vertex::VertexAdapter::new(base)),
    );

    AdapterRegistry { adapters }
}

/// Synthesize the final upstream URL: `https://{host}{path}` unless a test
/// override replaces the scheme and host.
pub(crate) fn finalize_url(base_override: &Option<String>, host: &str, path_and_query: &str) -> String {
    match base_override {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), path_and_query),
        None => format!("https://{host}{path_and_query}"),
    }
}
