//! The executor engine: the only writer to the event store for a given
//! task, and the orchestrator between an adapter, the policy engine, the
//! artifact store, a tool executor and pending-approval state.
//!
//! `Engine::start_task` is non-blocking: it returns a [`TaskRunHandle`]
//! immediately while the run proceeds under a per-session FIFO lock that
//! serializes tasks sharing a session (see [`session_lock`]).

pub mod cancel;
mod error;
pub mod pending;
mod session_lock;
mod task;
pub mod tool_executor;

pub use error::EngineError;
pub use pending::{ApprovalResolution, PendingApprovalError, PendingApprovals};
pub use tool_executor::{EchoToolExecutor, ToolExecutionOutcome, ToolExecutor, ToolExecutorError};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use aex_adapter::{Adapter, AdapterSessionHandle};
use aex_artifacts::ArtifactStore;
use aex_core::{PermissionMode, PolicyOverrides, RuntimeEnv, SessionId, TaskId, TaskInput, ToolCallId, ToolPermission};
use aex_events::EventStore;
use cancel::CancellationToken;
use serde::Deserialize;
use serde_json::Value;
use session_lock::SessionLockRegistry;
use task::TaskContext;

/// Tuning knobs for the engine that don't belong to any one task.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reported on `tool.call.completed` when the tool executor doesn't
    /// name its own execution environment.
    pub default_execution_env: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { default_execution_env: "codesdk_host".to_string() }
    }
}

/// A running or finished task. Dropping it without calling [`stop`](Self::stop)
/// or [`completion`](Self::completion) detaches it — the run keeps going in
/// the background.
pub struct TaskRunHandle {
    task_id: TaskId,
    cancellation: CancellationToken,
    pending: Arc<PendingApprovals>,
    stop_reason: Arc<StdMutex<Option<String>>>,
    join: tokio::task::JoinHandle<()>,
}

impl TaskRunHandle {
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Sets the task-wide stop flag, resolves every pending approval for
    /// this task as denied with `reason`, then signals the run to invoke
    /// `adapter.stop`. Idempotent: only the first call's reason sticks.
    pub fn stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut guard = self.stop_reason.lock().expect("stop reason lock poisoned");
            if guard.is_none() {
                *guard = Some(reason.clone());
            }
        }
        self.pending.resolve_all_for_task(&self.task_id, &reason);
        self.cancellation.cancel();
    }

    /// Awaits the run to completion (terminal event appended, lock
    /// released).
    pub async fn completion(self) {
        let _ = self.join.await;
    }
}

#[derive(Deserialize)]
struct ToolManifestEntry {
    name: String,
    #[serde(default)]
    permission: Option<ToolPermission>,
}

fn parse_tool_permissions(manifest: Option<&Value>) -> HashMap<String, ToolPermission> {
    let Some(value) = manifest else {
        return HashMap::new();
    };
    let Ok(entries) = serde_json::from_value::<Vec<ToolManifestEntry>>(value.clone()) else {
        return HashMap::new();
    };
    entries.into_iter().filter_map(|e| e.permission.map(|p| (e.name, p))).collect()
}

/// Everything a session needs to start a task against one runtime.
pub struct RuntimeBinding {
    pub adapter: Arc<dyn Adapter>,
    pub env: RuntimeEnv,
    pub session_handle: AdapterSessionHandle,
    pub runtime_name: String,
}

pub struct Engine {
    event_store: Arc<dyn EventStore>,
    artifact_store: Arc<dyn ArtifactStore>,
    tool_executor: Arc<dyn ToolExecutor>,
    session_locks: SessionLockRegistry,
    pending: Arc<PendingApprovals>,
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        artifact_store: Arc<dyn ArtifactStore>,
        tool_executor: Arc<dyn ToolExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            event_store,
            artifact_store,
            tool_executor,
            session_locks: SessionLockRegistry::new(),
            pending: Arc::new(PendingApprovals::new()),
            config,
        }
    }

    /// Tasks currently queued or running for this session.
    #[must_use]
    pub fn queue_depth(&self, session_id: &SessionId) -> usize {
        self.session_locks.depth(session_id)
    }

    /// Non-blocking: returns a handle immediately. The run itself proceeds
    /// under the session's FIFO lock.
    pub async fn start_task(
        self: &Arc<Self>,
        session_id: SessionId,
        runtime: RuntimeBinding,
        input: TaskInput,
        permission_mode: PermissionMode,
        overrides: PolicyOverrides,
    ) -> TaskRunHandle {
        let task_id = input.task_id.clone().unwrap_or_else(TaskId::new_random);
        let tool_permissions = parse_tool_permissions(input.tool_manifest.as_ref());

        let ctx = TaskContext {
            session_id: session_id.clone(),
            task_id: task_id.clone(),
            runtime_name: runtime.runtime_name.clone(),
            event_store: Arc::clone(&self.event_store),
            artifact_store: Arc::clone(&self.artifact_store),
            tool_executor: Arc::clone(&self.tool_executor),
            pending: Arc::clone(&self.pending),
            cancellation: CancellationToken::new(),
            stop_reason: Arc::new(StdMutex::new(None)),
            task_failure: Arc::new(StdMutex::new(None)),
            permission_mode,
            overrides: Arc::new(overrides),
            tool_permissions: Arc::new(tool_permissions),
            execution_env_default: self.config.default_execution_env.clone(),
        };

        let cancellation = ctx.cancellation.clone();
        let stop_reason = Arc::clone(&ctx.stop_reason);
        let pending = Arc::clone(&self.pending);
        let session_locks_session_id = session_id.clone();
        let engine = Arc::clone(self);

        let join = tokio::spawn(async move {
            let guard = engine.session_locks.acquire(&session_locks_session_id).await;
            task::run(ctx, runtime.adapter, runtime.env, runtime.session_handle, input, guard).await;
        });

        TaskRunHandle { task_id, cancellation, pending, stop_reason, join }
    }

    /// Resolves a pending approval as approved, checking `(attempt,
    /// input_hash)` against the pending record.
    pub fn approve_tool_call(
        &self,
        session_id: &SessionId,
        tool_call_id: &ToolCallId,
        attempt: u32,
        input_hash: &str,
    ) -> Result<(), PendingApprovalError> {
        self.pending.resolve(session_id, tool_call_id, attempt, input_hash, true, None)
    }

    /// Resolves a pending approval as denied, checking `(attempt,
    /// input_hash)` against the pending record.
    pub fn deny_tool_call(
        &self,
        session_id: &SessionId,
        tool_call_id: &ToolCallId,
        attempt: u32,
        input_hash: &str,
        reason: Option<String>,
    ) -> Result<(), PendingApprovalError> {
        self.pending.resolve(session_id, tool_call_id, attempt, input_hash, false, reason)
    }
}
