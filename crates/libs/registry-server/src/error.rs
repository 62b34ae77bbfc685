//! Error handling for the package mirror's HTTP surface.
//!
//! `ServerError` wraps `registry_core::Error` plus the handler-level and
//! upstream-translation error kinds, and renders every variant as the
//! `{error, message}` JSON shape with the documented status code.
//! Background tasks never construct a `ServerError` — they log and
//! swallow, so this type only ever crosses a handler boundary.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] registry_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded")]
    RateLimited,

    /// Not a failure: the client's cached copy is current. Rendered as an
    /// empty 304, never the `{error, message}` body shape.
    #[error("not modified")]
    NotModified,

    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Upstream returned 401/403 — translated to a flat 401.
    #[error("upstream authentication failed")]
    UpstreamAuthFailed,

    #[error("upstream resource not found")]
    UpstreamNotFound,

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream returned an error: {0}")]
    UpstreamBadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Classifies an outbound `reqwest` failure into the upstream variants
    /// this type names, so every sync-engine and artifact-fetch call site
    /// maps consistently instead of re-deriving this match per caller.
    pub fn from_upstream(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ServerError::UpstreamTimeout
        } else if err.is_connect() {
            ServerError::UpstreamUnavailable(err.to_string())
        } else {
            ServerError::UpstreamBadGateway(err.to_string())
        }
    }

    fn status_and_body(&self) -> (StatusCode, ErrorBody) {
        match self {
            ServerError::Core(e) => core_error_response(e),
            ServerError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("Internal Server Error", "an internal error occurred"),
            ),
            ServerError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, body("Unauthorized", msg)),
            ServerError::Forbidden(msg) => (StatusCode::FORBIDDEN, body("Forbidden", msg)),
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, body("Not Found", msg)),
            ServerError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                body("Too Many Requests", "rate limit exceeded"),
            ),
            ServerError::NotModified => (StatusCode::NOT_MODIFIED, body("Not Modified", "")),
            ServerError::NotAcceptable(msg) => (StatusCode::NOT_ACCEPTABLE, body("Not Acceptable", msg)),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, body("Bad Request", msg)),
            ServerError::UpstreamAuthFailed => {
                (StatusCode::UNAUTHORIZED, body("Unauthorized", "auth_failed"))
            }
            ServerError::UpstreamNotFound => {
                (StatusCode::NOT_FOUND, body("Not Found", "upstream resource not found"))
            }
            ServerError::UpstreamTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                body("Gateway Timeout", "upstream request timed out"),
            ),
            ServerError::UpstreamUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                body("Service Unavailable", "upstream is unreachable"),
            ),
            ServerError::UpstreamBadGateway(_) => (
                StatusCode::BAD_GATEWAY,
                body("Bad Gateway", "upstream request failed"),
            ),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                body("Internal Server Error", "an internal error occurred"),
            ),
        }
    }
}

fn body(error: &str, message: impl Into<String>) -> ErrorBody {
    ErrorBody {
        error: error.to_string(),
        message: message.into(),
    }
}

/// Maps `registry_core::Error` to a status + body without leaking internal
/// detail (SQL text, file paths) into the response.
fn core_error_response(e: &registry_core::Error) -> (StatusCode, ErrorBody) {
    use registry_core::Error;
    match e {
        Error::RepositoryNotFound(id) => (
            StatusCode::NOT_FOUND,
            body("Not Found", format!("repository not found: {id}")),
        ),
        Error::TokenNotFound => (StatusCode::NOT_FOUND, body("Not Found", "token not found")),
        Error::PackageVersionNotFound(name, version) => (
            StatusCode::NOT_FOUND,
            body("Not Found", format!("package not found: {name} {version}")),
        ),
        Error::ArtifactNotFound(name, version) => (
            StatusCode::NOT_FOUND,
            body("Not Found", format!("artifact not found: {name} {version}")),
        ),
        Error::ArtifactNotFoundById(id) => (
            StatusCode::NOT_FOUND,
            body("Not Found", format!("artifact not found: {id}")),
        ),
        Error::NotFound => (StatusCode::NOT_FOUND, body("Not Found", "resource not found")),
        Error::ProtectedRepository => (
            StatusCode::FORBIDDEN,
            body("Forbidden", "the packagist repository cannot be modified"),
        ),
        Error::AuthError => (StatusCode::UNAUTHORIZED, body("Unauthorized", "authentication failed")),
        Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, body("Bad Request", msg.clone())),
        Error::Validation(ve) => (StatusCode::BAD_REQUEST, body("Bad Request", ve.to_string())),
        Error::InvalidStorageKey(key) => (
            StatusCode::BAD_REQUEST,
            body("Bad Request", format!("invalid storage key: {key}")),
        ),
        Error::EncryptionError | Error::DecryptionError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            body("Internal Server Error", "credential processing failed"),
        ),
        Error::Libsql(_) | Error::SerdeJson(_) | Error::Io(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            body("Internal Server Error", "an internal error occurred"),
        ),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if matches!(self, ServerError::NotModified) {
            return StatusCode::NOT_MODIFIED.into_response();
        }
        tracing::error!(error = %self, "request failed");
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        let (status, b) = ServerError::RateLimited.status_and_body();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(b.error, "Too Many Requests");
    }

    #[test]
    fn protected_repository_maps_to_403() {
        let (status, _) = ServerError::Core(registry_core::Error::ProtectedRepository).status_and_body();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn unauthorized_carries_through_message() {
        let err = ServerError::Unauthorized("Invalid token".to_string());
        let (status, b) = err.status_and_body();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(b.message, "Invalid token");
    }

    #[test]
    fn not_modified_renders_as_bare_304() {
        let response = ServerError::NotModified.into_response();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn error_body_serializes_as_error_message_shape() {
        let b = body("Not Found", "nope");
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"error\":\"Not Found\""));
        assert!(json.contains("\"message\":\"nope\""));
    }
}
