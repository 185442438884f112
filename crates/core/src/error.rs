use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for store, lifecycle, provider, and handler operations.
#[derive(Debug, thiserror::Error)]
pub enum RubberduckError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed")]
    Validation(Vec<String>),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream timed out after {0}s")]
    UpstreamTimeout(u64),

    /// Raised only by boot-time `Store::open` and the health probe; any
    /// other store failure aborts the process inside the store layer.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RubberduckError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::UnknownEndpoint(_) => "unknown_endpoint",
            Self::Validation(_) => "invalid_request_error",
            Self::Auth(_) => "auth_error",
            Self::Upstream(_) => "upstream_error",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            _ => "server_error",
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) | Self::UnknownEndpoint(_) => "not_found",
            Self::Validation(_) => "invalid_request",
            Self::Auth(_) => "missing_credentials",
            Self::Upstream(_) => "upstream_unreachable",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for RubberduckError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Validation errors carry the offending field list
        let body = if let Self::Validation(ref fields) = self {
            json!({
                "error": {
                    "message": "failure config validation failed",
                    "type": self.error_type(),
                    "code": self.error_code(),
                    "fields": fields,
                }
            })
        } else {
            json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "code": self.error_code(),
                }
            })
        };

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<reqwest::Error> for RubberduckError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::UpstreamTimeout(30)
        } else if e.is_connect() {
            Self::Upstream(format!("connection failed: {e}"))
        } else {
            Self::Upstream(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RubberduckError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {e}"))
    }
}
