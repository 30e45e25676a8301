//! Policy decision vocabulary shared between the event schema and the
//! policy engine itself. The `decide` function lives in `aex-policy`; the
//! types below are what it consumes and produces, and what gets embedded in
//! `tool.call.policy_evaluated`/`tool.call.completed` event payloads.

use crate::ids::ToolCallId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Auto,
    Ask,
    Yolo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ToolPermission {
    ReadOnly,
    Write,
    Network,
    Dangerous,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_permissions: Option<Vec<ToolPermission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_permissions: Option<Vec<ToolPermission>>,
}

/// The result of evaluating policy for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Allow,
    Deny,
    Ask,
}

/// Who produced one entry in a policy snapshot's `sources` trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Runtime,
    Codesdk,
    User,
}

/// One entry in the evaluation trail: who evaluated, what they decided, and
/// which rule fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicyEvaluation {
    pub source: PolicySource,
    pub result: DecisionKind,
    pub rule: String,
}

/// The full record attached to every tool lifecycle event: the permission
/// mode in effect, the final decision, and the ordered trail of evaluations
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PolicySnapshot {
    pub permission_mode: PermissionMode,
    pub decision: DecisionKind,
    pub sources: Vec<PolicyEvaluation>,
}

/// The triple used to match approve/deny RPCs against a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCallIdentity {
    pub tool_call_id: ToolCallId,
    pub attempt: u32,
    pub input_hash: String,
}
