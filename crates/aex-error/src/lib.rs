//! Unified error taxonomy for the agent-exec daemon.
//!
//! Every fallible operation in the engine, event store, policy engine, and
//! HTTP server eventually resolves to one of the [`ErrorCode`] variants
//! below. The taxonomy is intentionally closed and small: it mirrors the
//! propagation policy in the system design rather than every possible
//! `std::error::Error` a dependency might produce.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Broad grouping used for log-level selection and metrics labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Context,
    Runtime,
    Tool,
    Auth,
    Lifecycle,
    Protocol,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Context => "context",
            Self::Runtime => "runtime",
            Self::Tool => "tool",
            Self::Auth => "auth",
            Self::Lifecycle => "lifecycle",
            Self::Protocol => "protocol",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The seven stable error codes of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Context compiler rejected input after truncation would still overflow.
    ContextTooLarge,
    /// Adapter failed to start or its event stream errored.
    RuntimeError,
    /// Tool execution surfaced `is_error`.
    ToolError,
    /// Adapter reported not-logged-in on a path that requires credentials.
    AuthError,
    /// Task stop was requested.
    Cancelled,
    /// Adapter emitted a malformed event; fatal to the task.
    InvalidEvent,
    /// Engine invariant violation (e.g. duplicate terminal event).
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::ContextTooLarge => ErrorCategory::Context,
            Self::RuntimeError => ErrorCategory::Runtime,
            Self::ToolError => ErrorCategory::Tool,
            Self::AuthError => ErrorCategory::Auth,
            Self::Cancelled => ErrorCategory::Lifecycle,
            Self::InvalidEvent => ErrorCategory::Protocol,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContextTooLarge => "CONTEXT_TOO_LARGE",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::ToolError => "TOOL_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::InvalidEvent => "INVALID_EVENT",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status this code maps to when surfaced synchronously rather than
    /// recovered locally into an event. `INTERNAL` is the only code that is
    /// ever surfaced this way by design; the rest recover into events.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::Internal => 500,
            _ => 409,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured daemon error: a stable code, a human message, optional
/// source error, and a context map for extra diagnostic fields.
pub struct DaemonError {
    code: ErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl DaemonError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    #[must_use]
    pub fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }
}

impl fmt::Debug for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            write!(f, " {}", serde_json::Value::Object(
                self.context.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            ))?;
        }
        Ok(())
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|b| b.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Serializable snapshot of a [`DaemonError`] for wire responses. The
/// opaque `source` is collapsed to its `Display` form since trait objects
/// cannot round-trip through serde.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DaemonErrorDto {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&DaemonError> for DaemonErrorDto {
    fn from(err: &DaemonError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<DaemonError> for DaemonErrorDto {
    fn from(err: DaemonError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_maps_to_a_category() {
        let codes = [
            ErrorCode::ContextTooLarge,
            ErrorCode::RuntimeError,
            ErrorCode::ToolError,
            ErrorCode::AuthError,
            ErrorCode::Cancelled,
            ErrorCode::InvalidEvent,
            ErrorCode::Internal,
        ];
        for code in codes {
            let _ = code.category();
            assert!(!code.as_str().is_empty());
        }
    }

    #[test]
    fn as_str_values_are_unique() {
        use std::collections::HashSet;
        let codes = [
            ErrorCode::ContextTooLarge,
            ErrorCode::RuntimeError,
            ErrorCode::ToolError,
            ErrorCode::AuthError,
            ErrorCode::Cancelled,
            ErrorCode::InvalidEvent,
            ErrorCode::Internal,
        ];
        let set: HashSet<_> = codes.iter().map(|c| c.as_str()).collect();
        assert_eq!(set.len(), codes.len());
    }

    #[test]
    fn serde_roundtrip_for_code() {
        let json = serde_json::to_string(&ErrorCode::ToolError).unwrap();
        assert_eq!(json, "\"TOOL_ERROR\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::ToolError);
    }

    #[test]
    fn only_internal_maps_to_500() {
        assert_eq!(ErrorCode::Internal.http_status(), 500);
        assert_eq!(ErrorCode::ToolError.http_status(), 409);
    }

    #[test]
    fn with_context_adds_a_field() {
        let err = DaemonError::new(ErrorCode::RuntimeError, "adapter crashed")
            .with_context("backend", "mock");
        assert_eq!(err.context().get("backend").unwrap(), "mock");
    }

    #[test]
    fn dto_drops_source_but_keeps_message() {
        let err = DaemonError::new(ErrorCode::Internal, "duplicate terminal")
            .with_source(std::io::Error::other("boom"));
        let dto = DaemonErrorDto::from(&err);
        assert_eq!(dto.code, ErrorCode::Internal);
        assert_eq!(dto.source_message.as_deref(), Some("boom"));
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = DaemonError::new(ErrorCode::AuthError, "not logged in");
        assert_eq!(format!("{err}"), "[AUTH_ERROR] not logged in");
    }
}
