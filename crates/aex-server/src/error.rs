//! The HTTP-layer error type. Every handler that can fail returns
//! `Result<_, ApiError>`; `ApiError` owns the status code directly rather
//! than deriving it from `ErrorCode::http_status`, since the wire surface
//! needs finer-grained statuses (400/404/409/413/429) than the engine's
//! own "recovered locally vs. 500" distinction draws.

use aex_error::ErrorCode;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// The wire-level `error` code: either one of `aex-error`'s closed
/// taxonomy, or a request-identity code the taxonomy doesn't cover (e.g.
/// `attempt_mismatch` on the approve/deny RPCs).
#[derive(Debug, Clone, Copy)]
enum WireCode {
    Taxonomy(ErrorCode),
    Custom(&'static str),
}

impl WireCode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Taxonomy(c) => c.as_str(),
            Self::Custom(s) => s,
        }
    }
}

impl From<ErrorCode> for WireCode {
    fn from(code: ErrorCode) -> Self {
        Self::Taxonomy(code)
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: WireCode,
    message: String,
    extra: serde_json::Map<String, Value>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<WireCode>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            extra: serde_json::Map::new(),
            retry_after_secs: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidEvent, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::Internal, message)
    }

    #[must_use]
    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// A 409 whose `error` body is a request-identity code outside the
    /// closed `ErrorCode` taxonomy, e.g. `attempt_mismatch`.
    #[must_use]
    pub fn conflict_code(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, WireCode::Custom(code), message)
    }

    #[must_use]
    pub fn too_large(size: usize, max: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::Internal,
            format!("body of {size} bytes exceeds the {max} byte limit"),
        )
    }

    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut err = Self::new(StatusCode::TOO_MANY_REQUESTS, ErrorCode::Internal, "rate limit exceeded")
            .with_field("retry_after", retry_after_secs);
        err.retry_after_secs = Some(retry_after_secs);
        err
    }

    #[must_use]
    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, ErrorCode::Internal, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        tracing::error!(error = %message.into(), "invariant violation surfaced at the HTTP layer");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = %self.code.as_str(), message = %self.message, "request failed");
        } else {
            tracing::warn!(code = %self.code.as_str(), message = %self.message, "request failed");
        }

        let mut body = json!({ "error": self.code.as_str(), "message": self.message });
        if let Value::Object(map) = &mut body {
            map.extend(self.extra);
        }

        let retry_after = self.retry_after_secs;
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}
