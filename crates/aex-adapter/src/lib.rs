//! The runtime adapter contract.
//!
//! An [`Adapter`] is the abstract interface every back-end runtime exposes
//! to the executor engine. The engine never speaks an upstream SDK's wire
//! protocol directly; it only calls through this trait, and only ever
//! consumes already-normalized events.

use aex_core::{NormalizedEvent, PermissionMode, RuntimeEnv, TaskId, TaskInput, ToolCallId};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("operation not supported by this adapter: {0}")]
    Unsupported(&'static str),
    #[error("adapter failed to start: {0}")]
    StartFailed(String),
    #[error("adapter stream errored: {0}")]
    StreamFailed(String),
    #[error("adapter rejected tool result/denial: {0}")]
    ToolHandoffFailed(String),
}

/// How a runtime executes tools it is asked to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionModel {
    /// The engine executes tools externally and feeds results back.
    ExternalMcp,
    /// The runtime executes tools itself and reports only the outcome.
    RuntimeInternal,
    /// A mix: some tools are engine-executed, some runtime-internal.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancellationModel {
    BestEffort,
    Guaranteed,
    Unknown,
}

/// Static capability record a runtime reports about itself.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdapterCapabilities {
    pub streaming: bool,
    pub tool_calls: bool,
    pub parallel_tool_calls: bool,
    pub stop: bool,
    pub artifacts: bool,
    pub session_resume: bool,
    pub usage_reporting: bool,
    pub auth_model: String,
    pub tool_execution_model: ToolExecutionModel,
    pub permission_model: String,
    pub cancellation_model: CancellationModel,
    pub recommended_isolation: aex_core::IsolationLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthStatus {
    pub logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CreateSessionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<Value>,
}

/// The handle returned by `create_session`/`resume_session`: everything the
/// engine needs to start tasks against a runtime-side session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdapterSessionHandle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<String>,
}

/// The outcome of an externally-executed tool, handed back to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolResult {
    pub output: Value,
    pub is_error: bool,
}

/// A lazy, finite, single-consumer, cancellable sequence of already-
/// normalized events produced by one task run, plus the two callbacks the
/// engine uses to hand tool outcomes back to the runtime.
#[async_trait]
pub trait TaskHandle: Send {
    /// Pull the next normalized event, or `None` once the sequence has
    /// ended. Non-restartable: once this returns `None` it must keep
    /// returning `None`.
    async fn next_event(&mut self) -> Option<NormalizedEvent>;

    async fn send_tool_result(
        &mut self,
        tool_call_id: &ToolCallId,
        result: ToolResult,
    ) -> Result<(), AdapterError>;

    async fn send_tool_denied(
        &mut self,
        tool_call_id: &ToolCallId,
        reason: &str,
    ) -> Result<(), AdapterError>;

    /// Must cause the event sequence to terminate promptly and release any
    /// resources. Best-effort: cannot guarantee in-flight work observes it
    /// immediately.
    async fn stop(&mut self, reason: Option<&str>) -> Result<(), AdapterError>;
}

/// The interface every runtime back-end implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities;

    async fn auth_status(&self, env: &RuntimeEnv) -> AuthStatus;

    /// Create a runtime-side session. Adapters without a concept of
    /// server-side sessions return `Unsupported`; the engine treats that as
    /// "proceed without one."
    async fn create_session(
        &self,
        _env: &RuntimeEnv,
        _opts: CreateSessionOptions,
    ) -> Result<AdapterSessionHandle, AdapterError> {
        Err(AdapterError::Unsupported("create_session"))
    }

    async fn resume_session(
        &self,
        _env: &RuntimeEnv,
        _handle: &AdapterSessionHandle,
    ) -> Result<AdapterSessionHandle, AdapterError> {
        Err(AdapterError::Unsupported("resume_session"))
    }

    async fn start_task(
        &self,
        env: &RuntimeEnv,
        handle: &AdapterSessionHandle,
        task_id: TaskId,
        input: TaskInput,
    ) -> Result<Box<dyn TaskHandle>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_error_names_the_operation() {
        let err = AdapterError::Unsupported("create_session");
        assert!(err.to_string().contains("create_session"));
    }
}
