//! AWS Signature Version 4 re-signing for Bedrock.
//!
//! Inbound credentials arrive on synthetic `X-AWS-*` headers; they are used
//! for exactly one signature and never logged or stored.

use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{SignableBody, SignableRequest, SigningSettings, sign};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use http::HeaderMap;

use rubberduck_core::error::RubberduckError;

pub const HEADER_ACCESS_KEY: &str = "x-aws-access-key";
pub const HEADER_SECRET_KEY: &str = "x-aws-secret-key";
pub const HEADER_SESSION_TOKEN: &str = "x-aws-session-token";

/// Credentials supplied by the client in custom-headers mode.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of debug output
        f.debug_struct("AwsCredentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// Pull `X-AWS-*` credential headers off an inbound request, if present.
pub fn extract_credentials(headers: &HeaderMap) -> Option<AwsCredentials> {
    let access_key = headers.get(HEADER_ACCESS_KEY)?.to_str().ok()?.to_string();
    let secret_key = headers.get(HEADER_SECRET_KEY)?.to_str().ok()?.to_string();
    let session_token = headers
        .get(HEADER_SESSION_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Some(AwsCredentials {
        access_key,
        secret_key,
        session_token,
    })
}

/// Sign a request against `url` and return the full outbound header map
/// (the input headers plus `authorization`, `x-amz-date`, and friends).
///
/// Signing is done over exactly the method, URL, headers, and body that
/// will be sent, so the upstream's canonical request matches ours.
pub fn sign_request(
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: &[u8],
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    time: SystemTime,
) -> Result<HeaderMap, RubberduckError> {
    let identity: Identity = Credentials::new(
        credentials.access_key.clone(),
        credentials.secret_key.clone(),
        credentials.session_token.clone(),
        None,
        "rubberduck",
    )
    .into();

    let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(time)
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| RubberduckError::Internal(format!("sigv4 params: {e}")))?
        .into();

    let signable = SignableRequest::new(
        method,
        url,
        headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        SignableBody::Bytes(body),
    )
    .map_err(|e| RubberduckError::Internal(format!("sigv4 request: {e}")))?;

    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| RubberduckError::Internal(format!("sigv4 signing: {e}")))?
        .into_parts();

    let mut request = http::Request::builder().method(method).uri(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let mut request = request
        .body(())
        .map_err(|e| RubberduckError::Internal(format!("sigv4 header assembly: {e}")))?;
    instructions.apply_to_request_http1x(&mut request);

    Ok(request.into_parts().0.headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::{Duration, UNIX_EPOCH};

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key: "AKIDEXAMPLE".to_string(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        }
    }

    fn signing_time() -> SystemTime {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap().timestamp();
        UNIX_EPOCH + Duration::from_secs(ts as u64)
    }

    #[test]
    fn extract_credentials_reads_custom_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_ACCESS_KEY, "AKID".parse().unwrap());
        headers.insert(HEADER_SECRET_KEY, "secret".parse().unwrap());
        let creds = extract_credentials(&headers).unwrap();
        assert_eq!(creds.access_key, "AKID");
        assert!(creds.session_token.is_none());

        headers.insert(HEADER_SESSION_TOKEN, "token".parse().unwrap());
        assert_eq!(
            extract_credentials(&headers).unwrap().session_token.as_deref(),
            Some("token")
        );
    }

    #[test]
    fn extract_credentials_requires_both_keys() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_ACCESS_KEY, "AKID".parse().unwrap());
        assert!(extract_credentials(&headers).is_none());
    }

    #[test]
    fn signature_has_bedrock_credential_scope() {
        let headers = vec![("content-type".to_string(), "application/json".to_string())];
        let signed = sign_request(
            "POST",
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-3-haiku-20240307-v1:0/invoke",
            &headers,
            br#"{"max_tokens":100}"#,
            &creds(),
            "us-east-1",
            "bedrock",
            signing_time(),
        )
        .unwrap();

        let auth = signed.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240301/us-east-1/bedrock/aws4_request"
        ));
        assert!(auth.contains("SignedHeaders="));
        assert!(auth.contains("Signature="));
        assert_eq!(
            signed.get("x-amz-date").unwrap().to_str().unwrap(),
            "20240301T000000Z"
        );
        // Original headers survive signing
        assert_eq!(
            signed.get("content-type").unwrap().to_str().unwrap(),
            "application/json"
        );
    }

    #[test]
    fn session_token_adds_security_token_header() {
        let mut creds = creds();
        creds.session_token = Some("FwoGZXIvYXdzEBc".to_string());
        let signed = sign_request(
            "POST",
            "https://bedrock-runtime.eu-west-1.amazonaws.com/model/m/invoke",
            &[],
            b"{}",
            &creds,
            "eu-west-1",
            "bedrock",
            signing_time(),
        )
        .unwrap();
        assert!(signed.contains_key("x-amz-security-token"));
        let auth = signed.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.contains("/eu-west-1/bedrock/aws4_request"));
    }

    #[test]
    fn signature_changes_with_body() {
        let sig = |body: &[u8]| {
            sign_request(
                "POST",
                "https://bedrock-runtime.us-east-1.amazonaws.com/model/m/invoke",
                &[],
                body,
                &creds(),
                "us-east-1",
                "bedrock",
                signing_time(),
            )
            .unwrap()
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
        };
        assert_ne!(sig(b"{\"a\":1}"), sig(b"{\"a\":2}"));
    }
}
