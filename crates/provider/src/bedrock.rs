//! AWS Bedrock adapter. The only adapter that rewrites credentials: clients
//! either supply raw keys on `X-AWS-*` headers for a SigV4 re-sign, or send
//! an already-signed request that is forwarded as-is.

use std::time::SystemTime;

use http::{HeaderMap, Method};

use rubberduck_core::error::RubberduckError;
use rubberduck_core::model::ProviderTag;

use crate::sigv4::{
    self, HEADER_ACCESS_KEY, HEADER_SECRET_KEY, HEADER_SESSION_TOKEN, extract_credentials,
};
use crate::{EndpointKind, InboundRequest, ProviderAdapter, Recognition, finalize_url, passthrough_headers};

const SERVICE: &str = "bedrock";

pub struct BedrockAdapter {
    region: String,
    base_override: Option<String>,
}

impl BedrockAdapter {
    pub fn new(region: String, base_override: Option<String>) -> Self {
        Self {
            region,
            base_override,
        }
    }

    /// Runtime API host (`/model/...` paths).
    fn runtime_host(&self) -> String {
        format!("bedrock-runtime.{}.amazonaws.com", self.region)
    }

    /// Control-plane host (`/foundation-models`, `/custom-models`).
    fn control_plane_host(&self) -> String {
        format!("bedrock.{}.amazonaws.com", self.region)
    }

    fn classify(&self, req: &InboundRequest<'_>) -> Option<Recognition> {
        if req.method == Method::POST
            && let Some(rest) = req.path.strip_prefix("/model/")
        {
            if let Some(model) = rest.strip_suffix("/invoke-with-response-stream") {
                if !model.is_empty() && !model.contains('/') {
                    return Some(Recognition {
                        kind: EndpointKind::InvokeStream,
                        model: Some(model.to_string()),
                    });
                }
            } else if let Some(model) = rest.strip_suffix("/invoke")
                && !model.is_empty()
                && !model.contains('/')
            {
                return Some(Recognition {
                    kind: EndpointKind::Invoke,
                    model: Some(model.to_string()),
                });
            }
            return None;
        }
        if req.method == Method::GET {
            match req.path {
                "/foundation-models" => {
                    return Some(Recognition {
                        kind: EndpointKind::FoundationModels,
                        model: None,
                    });
                }
                "/custom-models" => {
                    return Some(Recognition {
                        kind: EndpointKind::CustomModels,
                        model: None,
                    });
                }
                _ => return None,
            }
        }
        None
    }
}

impl ProviderAdapter for BedrockAdapter {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Bedrock
    }

    fn recognize(&self, req: &InboundRequest<'_>) -> Result<Recognition, RubberduckError> {
        self.classify(req).ok_or_else(|| {
            RubberduckError::UnknownEndpoint(format!(
                "{} {} is not a recognized bedrock endpoint",
                req.method, req.path
            ))
        })
    }

    fn upstream_url(&self, req: &InboundRequest<'_>) -> Result<String, RubberduckError> {
        let recognition = self.recognize(req)?;
        let host = match recognition.kind {
            EndpointKind::Invoke | EndpointKind::InvokeStream => self.runtime_host(),
            _ => self.control_plane_host(),
        };
        Ok(finalize_url(&self.base_override, &host, &req.path_and_query()))
    }

    fn authorize(&self, req: &InboundRequest<'_>) -> Result<HeaderMap, RubberduckError> {
        // Signed-passthrough mode: the client already computed a SigV4
        // signature (over the proxy's host, so the upstream will reject it
        // with InvalidSignatureException; documented as lossy).
        let presigned = req
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("AWS4-HMAC-SHA256"));
        if presigned {
            return Ok(passthrough_headers(req.headers, &[]));
        }

        // Custom-headers mode: strip the synthetic headers, re-sign against
        // the real Bedrock endpoint with the supplied credentials.
        let Some(credentials) = extract_credentials(req.headers) else {
            return Err(RubberduckError::Auth(format!(
                "bedrock proxying requires AWS credentials: supply {HEADER_ACCESS_KEY} and \
                 {HEADER_SECRET_KEY} (plus {HEADER_SESSION_TOKEN} for temporary credentials), \
                 or send a presigned AWS4-HMAC-SHA256 authorization header"
            )));
        };

        let url = self.upstream_url(req)?;
        let content_type = req
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json");
        let to_sign = vec![("content-type".to_string(), content_type.to_string())];

        sigv4::sign_request(
            req.method.as_str(),
            &url,
            &to_sign,
            req.body,
            &credentials,
            &self.region,
            SERVICE,
            SystemTime::now(),
        )
    }
}
