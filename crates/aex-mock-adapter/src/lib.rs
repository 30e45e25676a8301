//! A scriptable [`Adapter`] with no upstream SDK dependency: each
//! `start_task` call hands out a fixed, finite sequence of already-built
//! normalized events and records whichever callbacks the engine invokes in
//! response, so tests can assert on both sides of the contract.

use aex_adapter::{
    Adapter, AdapterCapabilities, AdapterError, AdapterSessionHandle, AuthStatus,
    CancellationModel, ToolExecutionModel, ToolResult, TaskHandle,
};
use aex_core::{
    ArtifactRef, ContextWindowMeta, EventKind, IsolationLevel, NormalizedEvent, RuntimeEnv,
    RuntimeInfo, TaskId, TaskInput, ToolCallId, TraceInfo, SCHEMA_VERSION,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A callback the engine made against a [`MockTaskHandle`], captured for
/// later assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    ToolResult { tool_call_id: ToolCallId, output: String, is_error: bool },
    ToolDenied { tool_call_id: ToolCallId, reason: String },
    Stop { reason: Option<String> },
}

/// Builds the `model.input` + `tool.call.requested` event pair most
/// scenarios need, with everything else left at test-friendly defaults.
#[must_use]
pub fn echo_tool_script(
    session_id: aex_core::SessionId,
    task_id: TaskId,
    tool_call_id: ToolCallId,
    tool_name: &str,
    tool_input: serde_json::Value,
) -> Vec<NormalizedEvent> {
    let trace = TraceInfo::for_task(session_id, task_id);
    let runtime = RuntimeInfo {
        name: "mock".to_string(),
        model: None,
        runtime_session_id: None,
    };
    let input_hash = aex_core::hash_canonical(&tool_input).unwrap_or_default();
    vec![
        NormalizedEvent {
            schema_version: SCHEMA_VERSION,
            seq: 0,
            time: Utc::now(),
            trace: trace.clone(),
            runtime: runtime.clone(),
            kind: EventKind::ModelInput {
                input_ref: ArtifactRef {
                    artifact_id: aex_core::ArtifactId::from("mock-input"),
                    content_type: "application/json".to_string(),
                    content_hash: "sha256:mock".to_string(),
                    size_bytes: 0,
                    name: None,
                },
                input_hash: "sha256:mock".to_string(),
                context_window: ContextWindowMeta {
                    max_tokens: None,
                    used_tokens: None,
                },
                implicit_sources_ref: None,
            },
        },
        NormalizedEvent {
            schema_version: SCHEMA_VERSION,
            seq: 0,
            time: Utc::now(),
            trace,
            runtime,
            kind: EventKind::ToolCallRequested {
                tool_call_id,
                attempt: 1,
                input_hash,
                name: tool_name.to_string(),
                input: tool_input,
            },
        },
    ]
}

type ScriptFn = dyn Fn(&TaskId, &TaskInput) -> Vec<NormalizedEvent> + Send + Sync;

/// An adapter whose event sequence per task is produced by a caller-supplied
/// closure rather than a real runtime SDK.
pub struct MockAdapter {
    name: String,
    tool_execution_model: ToolExecutionModel,
    script: Arc<ScriptFn>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockAdapter {
    #[must_use]
    pub fn new<F>(name: impl Into<String>, script: F) -> Self
    where
        F: Fn(&TaskId, &TaskInput) -> Vec<NormalizedEvent> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            tool_execution_model: ToolExecutionModel::ExternalMcp,
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_tool_execution_model(mut self, model: ToolExecutionModel) -> Self {
        self.tool_execution_model = model;
        self
    }

    /// Calls recorded across every task this adapter has started so far.
    #[must_use]
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock adapter lock poisoned").clone()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            streaming: true,
            tool_calls: true,
            parallel_tool_calls: false,
            stop: true,
            artifacts: false,
            session_resume: false,
            usage_reporting: false,
            auth_model: "none".to_string(),
            tool_execution_model: self.tool_execution_model,
            permission_model: "daemon".to_string(),
            cancellation_model: CancellationModel::BestEffort,
            recommended_isolation: IsolationLevel::Shared,
        }
    }

    async fn auth_status(&self, _env: &RuntimeEnv) -> AuthStatus {
        AuthStatus {
            logged_in: true,
            detail: None,
        }
    }

    async fn start_task(
        &self,
        _env: &RuntimeEnv,
        _handle: &AdapterSessionHandle,
        task_id: TaskId,
        input: TaskInput,
    ) -> Result<Box<dyn TaskHandle>, AdapterError> {
        let events = (self.script)(&task_id, &input);
        Ok(Box::new(MockTaskHandle {
            events: events.into(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct MockTaskHandle {
    events: VecDeque<NormalizedEvent>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

#[async_trait]
impl TaskHandle for MockTaskHandle {
    async fn next_event(&mut self) -> Option<NormalizedEvent> {
        self.events.pop_front()
    }

    async fn send_tool_result(
        &mut self,
        tool_call_id: &ToolCallId,
        result: ToolResult,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .expect("mock adapter lock poisoned")
            .push(RecordedCall::ToolResult {
                tool_call_id: tool_call_id.clone(),
                output: result.output.to_string(),
                is_error: result.is_error,
            });
        Ok(())
    }

    async fn send_tool_denied(
        &mut self,
        tool_call_id: &ToolCallId,
        reason: &str,
    ) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .expect("mock adapter lock poisoned")
            .push(RecordedCall::ToolDenied {
                tool_call_id: tool_call_id.clone(),
                reason: reason.to_string(),
            });
        Ok(())
    }

    async fn stop(&mut self, reason: Option<&str>) -> Result<(), AdapterError> {
        self.calls
            .lock()
            .expect("mock adapter lock poisoned")
            .push(RecordedCall::Stop {
                reason: reason.map(str::to_string),
            });
        self.events.clear();
        Ok(())
    }
}
