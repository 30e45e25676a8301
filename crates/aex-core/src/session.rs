//! Session and task data model.

use crate::ids::{SessionId, TaskId};
use crate::policy::PermissionMode;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An isolated conversational context owned by one runtime adapter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    pub session_id: SessionId,
    pub runtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<String>,
    pub permission_mode: PermissionMode,
    pub created_at: DateTime<Utc>,
}

/// The projection returned by `GET /sessions` and `GET /sessions/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub runtime: String,
    pub created_at: DateTime<Utc>,
    pub permission_mode: PermissionMode,
    pub last_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<TaskId>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id.clone(),
            runtime: s.runtime.clone(),
            created_at: s.created_at,
            permission_mode: s.permission_mode,
            last_seq: 0,
            active_task_id: None,
        }
    }
}

/// Lifecycle states of a task. Terminals are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
    /// Returned when the daemon has no record of the task id at all.
    Unknown,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// A single user-initiated exchange inside a session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub messages: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_manifest: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<Value>,
}

/// The derived status record returned by `GET /sessions/{id}/tasks/{taskId}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub status: TaskState,
    pub last_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
