//! The normalized event schema: the atomic unit of observability that every
//! adapter is translated into and every session's append-only log stores.

use crate::artifact::ArtifactRef;
use crate::ids::{SessionId, TaskId, ToolCallId};
use crate::policy::PolicySnapshot;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current schema version stamped on every normalized event.
pub const SCHEMA_VERSION: u32 = 1;

/// Correlates an event back to the session/task/request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceInfo {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl TraceInfo {
    #[must_use]
    pub fn for_task(session_id: SessionId, task_id: TaskId) -> Self {
        Self {
            session_id,
            task_id: Some(task_id),
            request_id: None,
            client_id: None,
            user_id: None,
        }
    }

    #[must_use]
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id,
            task_id: None,
            request_id: None,
            client_id: None,
            user_id: None,
        }
    }
}

/// Which runtime produced the event, and under which runtime-side session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<String>,
}

/// A complete normalized event as stored by the event store and delivered
/// over SSE.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedEvent {
    pub schema_version: u32,
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub trace: TraceInfo,
    pub runtime: RuntimeInfo,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// One content block streamed or finalized by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    TextDelta,
    JsonDelta,
    CodeDelta,
    UnknownDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContentBlock {
    pub block_id: String,
    pub kind: DeltaKind,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContextWindowMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_tokens: Option<u32>,
}

/// Who actually ran a tool: the runtime itself, or the engine's own tool
/// executor on the runtime's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutedBy {
    Runtime,
    Codesdk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// The 19 normalized event kinds, tagged by `type` with dotted wire names.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "session.created")]
    SessionCreated { runtime: String },

    #[serde(rename = "task.started")]
    TaskStarted {},

    #[serde(rename = "model.input")]
    ModelInput {
        input_ref: ArtifactRef,
        input_hash: String,
        context_window: ContextWindowMeta,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        implicit_sources_ref: Option<ArtifactRef>,
    },

    #[serde(rename = "runtime.request.started")]
    RuntimeRequestStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
    },

    #[serde(rename = "runtime.request.completed")]
    RuntimeRequestCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    #[serde(rename = "model.output.delta")]
    ModelOutputDelta {
        block_id: String,
        kind: DeltaKind,
        delta: String,
    },

    #[serde(rename = "model.output.completed")]
    ModelOutputCompleted { blocks: Vec<ContentBlock> },

    #[serde(rename = "tool.call.requested")]
    ToolCallRequested {
        tool_call_id: ToolCallId,
        attempt: u32,
        input_hash: String,
        name: String,
        input: Value,
    },

    #[serde(rename = "tool.call.policy_evaluated")]
    ToolCallPolicyEvaluated {
        tool_call_id: ToolCallId,
        snapshot: PolicySnapshot,
    },

    #[serde(rename = "tool.call.approved")]
    ToolCallApproved { tool_call_id: ToolCallId },

    #[serde(rename = "tool.call.denied")]
    ToolCallDenied {
        tool_call_id: ToolCallId,
        reason: String,
    },

    #[serde(rename = "tool.call.started")]
    ToolCallStarted { tool_call_id: ToolCallId },

    #[serde(rename = "tool.output.delta")]
    ToolOutputDelta {
        tool_call_id: ToolCallId,
        stream: OutputStream,
        chunk: String,
    },

    #[serde(rename = "tool.output.completed")]
    ToolOutputCompleted {
        tool_call_id: ToolCallId,
        bytes_len: u64,
    },

    #[serde(rename = "tool.call.completed")]
    ToolCallCompleted {
        tool_call_id: ToolCallId,
        executed_by: ExecutedBy,
        execution_env: String,
        policy_snapshot: PolicySnapshot,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sandbox_summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_ref: Option<ArtifactRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_preview: Option<String>,
        is_error: bool,
    },

    #[serde(rename = "usage.reported")]
    UsageReported {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_tokens: Option<u64>,
    },

    #[serde(rename = "task.completed")]
    TaskCompleted {},

    #[serde(rename = "task.failed")]
    TaskFailed {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
    },

    #[serde(rename = "task.stopped")]
    TaskStopped { reason: String },
}

impl EventKind {
    /// The dotted wire name of this event's `type` field.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::TaskStarted {} => "task.started",
            Self::ModelInput { .. } => "model.input",
            Self::RuntimeRequestStarted { .. } => "runtime.request.started",
            Self::RuntimeRequestCompleted { .. } => "runtime.request.completed",
            Self::ModelOutputDelta { .. } => "model.output.delta",
            Self::ModelOutputCompleted { .. } => "model.output.completed",
            Self::ToolCallRequested { .. } => "tool.call.requested",
            Self::ToolCallPolicyEvaluated { .. } => "tool.call.policy_evaluated",
            Self::ToolCallApproved { .. } => "tool.call.approved",
            Self::ToolCallDenied { .. } => "tool.call.denied",
            Self::ToolCallStarted { .. } => "tool.call.started",
            Self::ToolOutputDelta { .. } => "tool.output.delta",
            Self::ToolOutputCompleted { .. } => "tool.output.completed",
            Self::ToolCallCompleted { .. } => "tool.call.completed",
            Self::UsageReported { .. } => "usage.reported",
            Self::TaskCompleted {} => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskStopped { .. } => "task.stopped",
        }
    }

    /// `true` for the three kinds that are terminal for a task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TaskCompleted {} | Self::TaskFailed { .. } | Self::TaskStopped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_use_dotted_wire_form() {
        assert_eq!(EventKind::TaskCompleted {}.type_name(), "task.completed");
        assert_eq!(
            EventKind::ToolCallRequested {
                tool_call_id: ToolCallId::from("tc1"),
                attempt: 1,
                input_hash: "h1".into(),
                name: "workspace.read".into(),
                input: Value::Null,
            }
            .type_name(),
            "tool.call.requested"
        );
    }

    #[test]
    fn only_three_kinds_are_terminal() {
        assert!(EventKind::TaskCompleted {}.is_terminal());
        assert!(EventKind::TaskFailed { error: "x".into(), retryable: None }.is_terminal());
        assert!(EventKind::TaskStopped { reason: "x".into() }.is_terminal());
        assert!(!EventKind::TaskStarted {}.is_terminal());
    }

    #[test]
    fn serializes_with_tagged_type_field() {
        let kind = EventKind::ToolCallDenied {
            tool_call_id: ToolCallId::from("tc1"),
            reason: "no".into(),
        };
        let v = serde_json::to_value(&kind).unwrap();
        assert_eq!(v["type"], "tool.call.denied");
        assert_eq!(v["reason"], "no");
    }
}
