//! The per-task run: the five-step task loop and the eight-step
//! tool-handler subroutine. Spawned once per `start_task` call, under the
//! session's FIFO lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use aex_adapter::{Adapter, AdapterSessionHandle, TaskHandle as AdapterTaskHandle, ToolResult};
use aex_artifacts::{store_tool_result, ArtifactStore, StoredResult};
use aex_core::{
    DecisionKind, EventKind, ExecutedBy, OutputStream, PermissionMode, PolicyOverrides,
    RuntimeEnv, RuntimeInfo, SessionId, TaskId, TaskInput, ToolCallId, ToolPermission, TraceInfo,
};
use aex_events::{EventStore, EventStoreError, NewEvent};
use aex_policy::PolicyAuditor;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as TokioMutex, OwnedMutexGuard};

use crate::cancel::CancellationToken;
use crate::pending::{ApprovalResolution, PendingApprovals};
use crate::tool_executor::ToolExecutor;

/// Everything one task run needs, shared between the main loop and the
/// tool-handler worker. Cheap to clone: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub session_id: SessionId,
    pub task_id: TaskId,
    pub runtime_name: String,
    pub event_store: Arc<dyn EventStore>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    pub pending: Arc<PendingApprovals>,
    pub cancellation: CancellationToken,
    pub stop_reason: Arc<StdMutex<Option<String>>>,
    pub task_failure: Arc<StdMutex<Option<String>>>,
    pub permission_mode: PermissionMode,
    pub overrides: Arc<PolicyOverrides>,
    pub tool_permissions: Arc<HashMap<String, ToolPermission>>,
    pub execution_env_default: String,
}

async fn append(ctx: &TaskContext, kind: EventKind) -> Result<aex_core::NormalizedEvent, EventStoreError> {
    let trace = TraceInfo::for_task(ctx.session_id.clone(), ctx.task_id.clone());
    let runtime = RuntimeInfo {
        name: ctx.runtime_name.clone(),
        model: None,
        runtime_session_id: None,
    };
    ctx.event_store
        .append(&ctx.session_id, NewEvent::new(trace, runtime, kind))
        .await
}

struct ToolJob {
    tool_call_id: ToolCallId,
    attempt: u32,
    input_hash: String,
    name: String,
    input: Value,
}

enum ToolHandlerOutcome {
    Done,
    Failed(String),
}

/// The eight-step tool-handler subroutine (external execution), run once
/// per `tool.call.requested`.
async fn handle_tool_call(
    ctx: &TaskContext,
    task_handle: &Arc<TokioMutex<Box<dyn AdapterTaskHandle>>>,
    job: ToolJob,
) -> Result<ToolHandlerOutcome, EventStoreError> {
    // 1. Query policy.
    let tool_permission = ctx.tool_permissions.get(&job.name).copied();
    let mut snapshot = aex_policy::decide(ctx.permission_mode, &job.name, tool_permission, &ctx.overrides);
    append(
        ctx,
        EventKind::ToolCallPolicyEvaluated {
            tool_call_id: job.tool_call_id.clone(),
            snapshot: snapshot.clone(),
        },
    )
    .await?;

    let mut denied_reason: Option<String> = None;

    match snapshot.decision {
        // 2. Deny path.
        DecisionKind::Deny => {
            let rule = snapshot.sources.last().map(|e| e.rule.clone()).unwrap_or_default();
            denied_reason = Some(format!("denied by policy rule {rule}"));
        }
        // 3. Ask path.
        DecisionKind::Ask => {
            let registration = ctx.pending.register(
                ctx.session_id.clone(),
                job.tool_call_id.clone(),
                job.attempt,
                job.input_hash.clone(),
                ctx.task_id.clone(),
            );
            let resolution = match registration {
                Ok(receiver) => {
                    tokio::select! {
                        resolved = receiver => resolved.unwrap_or_else(|_| ApprovalResolution::Denied {
                            reason: "task ended".to_string(),
                        }),
                        () = ctx.cancellation.cancelled() => ApprovalResolution::Denied {
                            reason: ctx
                                .stop_reason
                                .lock()
                                .expect("stop reason lock poisoned")
                                .clone()
                                .unwrap_or_else(|| "stopped".to_string()),
                        },
                    }
                }
                Err(e) => ApprovalResolution::Denied { reason: e.to_string() },
            };
            let approved = matches!(resolution, ApprovalResolution::Approved);
            snapshot = PolicyAuditor::resolve_ask(snapshot, approved);
            append(
                ctx,
                EventKind::ToolCallPolicyEvaluated {
                    tool_call_id: job.tool_call_id.clone(),
                    snapshot: snapshot.clone(),
                },
            )
            .await?;
            if !approved {
                denied_reason = Some(match resolution {
                    ApprovalResolution::Denied { reason } => reason,
                    ApprovalResolution::Approved => unreachable!(),
                });
            }
        }
        DecisionKind::Allow => {}
    }

    if let Some(reason) = denied_reason {
        append(
            ctx,
            EventKind::ToolCallDenied {
                tool_call_id: job.tool_call_id.clone(),
                reason: reason.clone(),
            },
        )
        .await?;
        let _ = task_handle.lock().await.send_tool_denied(&job.tool_call_id, &reason).await;
        return Ok(ToolHandlerOutcome::Done);
    }

    // 4. Allow.
    append(
        ctx,
        EventKind::ToolCallApproved { tool_call_id: job.tool_call_id.clone() },
    )
    .await?;
    append(
        ctx,
        EventKind::ToolCallStarted { tool_call_id: job.tool_call_id.clone() },
    )
    .await?;

    // 5. Run the tool, streaming output chunks.
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<(OutputStream, String)>(64);
    let exec_handle = {
        let executor = Arc::clone(&ctx.tool_executor);
        let name = job.name.clone();
        let input = job.input.clone();
        let cancellation = ctx.cancellation.clone();
        tokio::spawn(async move { executor.execute(&name, &input, chunk_tx, cancellation).await })
    };

    let mut bytes_len: u64 = 0;
    let mut any_output = false;
    while let Some((stream, chunk)) = chunk_rx.recv().await {
        any_output = true;
        bytes_len += chunk.len() as u64;
        append(
            ctx,
            EventKind::ToolOutputDelta { tool_call_id: job.tool_call_id.clone(), stream, chunk },
        )
        .await?;
    }

    let (is_error, output_value, sandbox_summary, execution_env, executor_failed) = match exec_handle.await {
        Ok(Ok(outcome)) => (
            outcome.is_error,
            outcome.output,
            outcome.sandbox_summary,
            outcome.execution_env.unwrap_or_else(|| ctx.execution_env_default.clone()),
            false,
        ),
        Ok(Err(e)) => (true, json!({ "error": e.to_string() }), None, ctx.execution_env_default.clone(), true),
        Err(join_err) => (
            true,
            json!({ "error": join_err.to_string() }),
            None,
            ctx.execution_env_default.clone(),
            true,
        ),
    };

    // 6. Store the result if it's large.
    let result_bytes = serde_json::to_vec(&output_value).unwrap_or_default();
    let stored = store_tool_result(ctx.artifact_store.as_ref(), &result_bytes, "application/json").await;
    let (result_ref, result_preview) = match stored {
        Ok(StoredResult::Inline { text }) => (None, Some(text)),
        Ok(StoredResult::Offloaded { result_ref, preview }) => (Some(result_ref), Some(preview)),
        Err(_) => (None, None),
    };

    // 7. Completion events.
    if any_output {
        append(
            ctx,
            EventKind::ToolOutputCompleted { tool_call_id: job.tool_call_id.clone(), bytes_len },
        )
        .await?;
    }
    append(
        ctx,
        EventKind::ToolCallCompleted {
            tool_call_id: job.tool_call_id.clone(),
            executed_by: ExecutedBy::Codesdk,
            execution_env,
            policy_snapshot: snapshot,
            sandbox_summary,
            result_ref,
            result_preview,
            is_error,
        },
    )
    .await?;

    // 8. Hand the result back to the adapter.
    let send_result = task_handle
        .lock()
        .await
        .send_tool_result(&job.tool_call_id, ToolResult { output: output_value, is_error })
        .await;

    if send_result.is_err() {
        return Ok(ToolHandlerOutcome::Failed("send_tool_result failed".to_string()));
    }
    if executor_failed {
        return Ok(ToolHandlerOutcome::Failed("tool executor failed".to_string()));
    }
    Ok(ToolHandlerOutcome::Done)
}

/// The five-step task loop. Runs for the lifetime of one task, holding
/// `_session_guard` for as long as it runs so no other task for this
/// session can proceed concurrently.
pub(crate) async fn run(
    ctx: TaskContext,
    adapter: Arc<dyn Adapter>,
    env: RuntimeEnv,
    session_handle: AdapterSessionHandle,
    input: TaskInput,
    _session_guard: OwnedMutexGuard<()>,
) {
    append(&ctx, EventKind::TaskStarted {}).await.ok();

    let external_tools = matches!(
        adapter.capabilities().tool_execution_model,
        aex_adapter::ToolExecutionModel::ExternalMcp | aex_adapter::ToolExecutionModel::Hybrid
    );

    let task_handle = match adapter.start_task(&env, &session_handle, ctx.task_id.clone(), input).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(task_id = %ctx.task_id, error = %e, "adapter.start_task failed");
            append(&ctx, EventKind::TaskFailed { error: e.to_string(), retryable: None }).await.ok();
            return;
        }
    };
    let task_handle: Arc<TokioMutex<Box<dyn AdapterTaskHandle>>> = Arc::new(TokioMutex::new(task_handle));

    let (job_tx, mut job_rx) = mpsc::channel::<ToolJob>(256);
    let worker_ctx = ctx.clone();
    let worker_task_handle = Arc::clone(&task_handle);
    let worker = tokio::spawn(async move {
        while let Some(job) = job_rx.recv().await {
            match handle_tool_call(&worker_ctx, &worker_task_handle, job).await {
                Ok(ToolHandlerOutcome::Done) => {}
                Ok(ToolHandlerOutcome::Failed(reason)) => {
                    let mut guard = worker_ctx.task_failure.lock().expect("task failure lock poisoned");
                    if guard.is_none() {
                        *guard = Some(reason);
                    }
                    drop(guard);
                    worker_ctx.cancellation.cancel();
                }
                Err(e) => {
                    let mut guard = worker_ctx.task_failure.lock().expect("task failure lock poisoned");
                    if guard.is_none() {
                        *guard = Some(e.to_string());
                    }
                    drop(guard);
                    worker_ctx.cancellation.cancel();
                }
            }
        }
    });

    let mut terminal_seen = false;
    loop {
        let maybe_event = {
            let task_handle = Arc::clone(&task_handle);
            tokio::select! {
                ev = async move { task_handle.lock().await.next_event().await } => Some(ev),
                () = ctx.cancellation.cancelled() => None,
            }
        };
        let Some(stream_result) = maybe_event else { break };
        let Some(event) = stream_result else { break };

        let is_tool_call_requested = matches!(event.kind, EventKind::ToolCallRequested { .. });
        if event.kind.is_terminal() {
            terminal_seen = true;
        }

        match ctx.event_store.append(&ctx.session_id, NewEvent::new(event.trace, event.runtime, event.kind)).await {
            Ok(stored) => {
                if is_tool_call_requested && external_tools {
                    if let EventKind::ToolCallRequested { tool_call_id, attempt, input_hash, name, input } = stored.kind {
                        let _ = job_tx
                            .send(ToolJob { tool_call_id, attempt, input_hash, name, input })
                            .await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(task_id = %ctx.task_id, error = %e, "failed to append adapter event");
                let mut guard = ctx.task_failure.lock().expect("task failure lock poisoned");
                if guard.is_none() {
                    *guard = Some(e.to_string());
                }
                break;
            }
        }

        if terminal_seen {
            break;
        }
    }

    ctx.pending.resolve_all_for_task(&ctx.task_id, "task ended");
    drop(job_tx);
    let _ = worker.await;

    let was_cancelled = ctx.cancellation.is_cancelled();
    let failure = ctx.task_failure.lock().expect("task failure lock poisoned").clone();
    let stop_reason = ctx.stop_reason.lock().expect("stop reason lock poisoned").clone();

    if let Some(reason) = &stop_reason {
        let _ = task_handle.lock().await.stop(Some(reason)).await;
    } else if was_cancelled {
        let _ = task_handle.lock().await.stop(None).await;
    }

    if terminal_seen {
        return;
    }

    if let Some(reason) = failure {
        append(&ctx, EventKind::TaskFailed { error: reason, retryable: None }).await.ok();
    } else if was_cancelled {
        let reason = stop_reason.unwrap_or_else(|| "stopped".to_string());
        append(&ctx, EventKind::TaskStopped { reason }).await.ok();
    } else {
        append(&ctx, EventKind::TaskCompleted {}).await.ok();
    }
}
