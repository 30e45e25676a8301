//! Route handlers. Grouped by resource rather than split into many small
//! files, matching how the daemon tooling this workspace is built on lays
//! out its own single-file handler set.

use crate::error::ApiError;
use crate::sse;
use crate::AppState;
use aex_adapter::{AdapterSessionHandle, CreateSessionOptions};
use aex_core::{
    Isolation, IsolationLevel, IsolationMode, NormalizedEvent, PermissionMode, PolicyOverrides, RuntimeEnv, Session,
    SessionId, SessionSummary, TaskId, TaskInput, TaskState, TaskStatus, ToolCallId, CONTRACT_VERSION,
};
use aex_engine::RuntimeBinding;
use aex_runtime_env::RuntimeEnvRequest;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "name": state.config.name,
        "runtimes": state.adapters.keys().collect::<Vec<_>>(),
        "contract_version": CONTRACT_VERSION,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RuntimeQuery {
    pub runtime: Option<String>,
}

fn resolve_runtime<'a>(state: &'a AppState, query: &'a Option<String>) -> &'a str {
    query.as_deref().unwrap_or(state.config.default_runtime.as_str())
}

pub async fn health(State(state): State<Arc<AppState>>, Query(q): Query<RuntimeQuery>) -> Result<impl IntoResponse, ApiError> {
    let runtime = resolve_runtime(&state, &q.runtime);
    let adapter = state.adapter(runtime)?;
    let env = shared_env(&state);
    let auth = adapter.auth_status(&env).await;
    Ok(Json(json!({
        "ok": true,
        "runtime": runtime,
        "time": Utc::now().to_rfc3339(),
        "capabilities": adapter.capabilities(),
        "auth": auth,
    })))
}

pub async fn capabilities(State(state): State<Arc<AppState>>, Query(q): Query<RuntimeQuery>) -> Result<impl IntoResponse, ApiError> {
    let runtime = resolve_runtime(&state, &q.runtime);
    let adapter = state.adapter(runtime)?;
    Ok(Json(adapter.capabilities()))
}

pub async fn auth_status(State(state): State<Arc<AppState>>, Query(q): Query<RuntimeQuery>) -> Result<impl IntoResponse, ApiError> {
    let runtime = resolve_runtime(&state, &q.runtime);
    let adapter = state.adapter(runtime)?;
    let env = shared_env(&state);
    Ok(Json(adapter.auth_status(&env).await))
}

/// A minimal, process-shared environment for calls (`health`, `auth/status`)
/// that happen outside any particular session's isolation.
fn shared_env(_state: &AppState) -> RuntimeEnv {
    RuntimeEnv {
        cwd: std::env::current_dir().unwrap_or_else(|_| ".".into()),
        env: BTreeMap::new(),
        credential_namespace: "daemon".to_string(),
        isolation: Isolation {
            level: IsolationLevel::Shared,
            mode: IsolationMode::InProcess,
            home_dir: None,
            xdg_config_home: None,
            xdg_state_home: None,
            xdg_cache_home: None,
        },
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let inflight = state.config.max_inflight_tasks - state.inflight_tasks.available_permits();
    let sse_clients = state.sse_clients.load(std::sync::atomic::Ordering::SeqCst);
    let sse_backpressure_drops = state.sse_backpressure_drops.load(std::sync::atomic::Ordering::SeqCst);
    let session_count = state.sessions.lock().expect("sessions lock poisoned").len();
    let body = format!(
        "# HELP aex_inflight_tasks Tasks currently running.\n\
         # TYPE aex_inflight_tasks gauge\n\
         aex_inflight_tasks {inflight}\n\
         # HELP aex_sse_clients Live SSE subscribers.\n\
         # TYPE aex_sse_clients gauge\n\
         aex_sse_clients {sse_clients}\n\
         # HELP aex_sse_backpressure_drops SSE subscribers closed for falling behind.\n\
         # TYPE aex_sse_backpressure_drops counter\n\
         aex_sse_backpressure_drops {sse_backpressure_drops}\n\
         # HELP aex_sessions Known sessions.\n\
         # TYPE aex_sessions gauge\n\
         aex_sessions {session_count}\n"
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub next_after: Option<String>,
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListSessionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.unwrap_or(50).max(1);
    let after = q.after.map(SessionId::from);

    let sessions: Vec<Session> = {
        let guard = state.sessions.lock().expect("sessions lock poisoned");
        guard
            .iter()
            .filter(|(id, _)| after.as_ref().is_none_or(|cursor| *id > cursor))
            .map(|(_, record)| record.session.clone())
            .take(limit + 1)
            .collect()
    };

    let truncated = sessions.len() > limit;
    let mut sessions = sessions;
    sessions.truncate(limit);
    let next_after = if truncated {
        sessions.last().map(|s| s.session_id.as_str().to_string())
    } else {
        None
    };

    let mut out = Vec::with_capacity(sessions.len());
    for session in &sessions {
        out.push(summarize(&state, session).await?);
    }

    Ok(Json(ListSessionsResponse { sessions: out, next_after }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub runtime: Option<String>,
    pub credential_namespace: Option<String>,
    pub isolation_level: Option<IsolationLevel>,
    pub isolation_mode: Option<IsolationMode>,
    pub cwd: Option<std::path::PathBuf>,
    pub env: Option<BTreeMap<String, String>>,
    pub model: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    pub runtime_config: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub runtime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_session_id: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let runtime_name = body.runtime.clone().unwrap_or_else(|| state.config.default_runtime.clone());
    let adapter = state.adapter(&runtime_name)?;

    let session_id = SessionId::new_random();
    let permission_mode = body.permission_mode.unwrap_or(state.config.default_permission_mode);

    let req = RuntimeEnvRequest {
        credential_namespace: body.credential_namespace.clone().unwrap_or_else(|| session_id.as_str().to_string()),
        session_id: Some(session_id.as_str().to_string()),
        level: body.isolation_level.unwrap_or(IsolationLevel::Shared),
        mode: body.isolation_mode.unwrap_or(IsolationMode::InProcess),
        cwd: body.cwd.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into())),
        base_env: body.env.clone().unwrap_or_default(),
    };
    let built = state
        .runtime_env_builder
        .build(&req)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let env = built.env().clone();

    let opts = CreateSessionOptions {
        model: body.model.clone(),
        title: None,
        permission_mode: Some(permission_mode),
        runtime_config: body.runtime_config.clone(),
    };
    let session_handle = match adapter.create_session(&env, opts).await {
        Ok(handle) => handle,
        Err(aex_adapter::AdapterError::Unsupported(_)) => AdapterSessionHandle { runtime_session_id: None },
        Err(e) => return Err(ApiError::internal(e.to_string())),
    };

    let created_at = Utc::now();
    let session = Session {
        session_id: session_id.clone(),
        runtime: runtime_name.clone(),
        runtime_session_id: session_handle.runtime_session_id.clone(),
        permission_mode,
        created_at,
    };

    state.sessions.lock().expect("sessions lock poisoned").insert(
        session_id.clone(),
        crate::SessionRecord { session: session.clone(), env, session_handle: session_handle.clone() },
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            runtime: runtime_name,
            runtime_session_id: session_handle.runtime_session_id,
            created_at,
        }),
    ))
}

async fn summarize(state: &AppState, session: &Session) -> Result<SessionSummary, ApiError> {
    let events = state
        .event_store
        .list(&session.session_id, 0, None)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let (last_seq, active_task_id) = derive_session_progress(&events);
    let mut summary = SessionSummary::from(session);
    summary.last_seq = last_seq;
    summary.active_task_id = active_task_id;
    Ok(summary)
}

/// Walks a session's events in order, tracking which task (if any) is
/// currently between its `task.started` and its terminal event.
fn derive_session_progress(events: &[NormalizedEvent]) -> (u64, Option<TaskId>) {
    let last_seq = events.last().map(|e| e.seq).unwrap_or(0);
    let mut active: Option<TaskId> = None;
    for event in events {
        match &event.kind {
            aex_core::EventKind::TaskStarted {} => active = event.trace.task_id.clone(),
            kind if kind.is_terminal() => {
                if event.trace.task_id == active {
                    active = None;
                }
            }
            _ => {}
        }
    }
    (last_seq, active)
}

pub async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let session = state.session(&SessionId::from(id))?;
    Ok(Json(summarize(&state, &session).await?))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub after_seq: Option<u64>,
    pub from_seq: Option<u64>,
    pub limit: Option<usize>,
    pub stream: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<NormalizedEvent>,
    pub next_seq: u64,
}

pub async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = SessionId::from(id);
    state.session(&session_id)?;
    let from_seq = q.after_seq.or(q.from_seq).unwrap_or(0);

    let wants_sse = q.stream == Some(1)
        || headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));

    if wants_sse {
        return Ok(sse::event_stream(state, session_id, from_seq).await?.into_response());
    }

    let events = state
        .event_store
        .list(&session_id, from_seq, q.limit)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let next_seq = events.last().map(|e| e.seq).unwrap_or(from_seq);
    Ok(Json(EventsResponse { events, next_seq }).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    pub task_id: Option<String>,
    pub messages: Value,
    pub permission_mode: Option<PermissionMode>,
    pub tool_manifest: Option<Value>,
    pub runtime_config: Option<Value>,
    #[serde(default)]
    pub policy_overrides: PolicyOverrides,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub session_id: SessionId,
    pub task_id: TaskId,
    pub status: &'static str,
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CreateTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::from(id);
    let session = state.session(&session_id)?;
    let adapter = state.adapter(&session.runtime)?;

    let permit = Arc::clone(&state.inflight_tasks)
        .try_acquire_owned()
        .map_err(|_| ApiError::backpressure("too many tasks already in flight"))?;

    let (env, session_handle) = {
        let guard = state.sessions.lock().expect("sessions lock poisoned");
        let record = guard.get(&session_id).ok_or_else(|| ApiError::not_found("unknown session"))?;
        (record.env.clone(), record.session_handle.clone())
    };

    let task_id = body.task_id.clone().map(TaskId::from).unwrap_or_else(TaskId::new_random);
    let permission_mode = body.permission_mode.unwrap_or(session.permission_mode);
    let input = TaskInput {
        task_id: Some(task_id.clone()),
        messages: body.messages,
        permission_mode: Some(permission_mode),
        tool_manifest: body.tool_manifest,
        runtime_config: body.runtime_config,
    };

    let binding = RuntimeBinding { adapter, env, session_handle, runtime_name: session.runtime.clone() };
    let handle = state
        .engine
        .start_task(session_id.clone(), binding, input, permission_mode, body.policy_overrides)
        .await;

    state
        .running_tasks
        .lock()
        .expect("running tasks lock poisoned")
        .insert((session_id.clone(), task_id.clone()), Arc::new(handle));

    // Release the inflight-task permit and drop the task's registry entry
    // once its terminal event appears, rather than holding both forever.
    let watch_state = Arc::clone(&state);
    let watch_session_id = session_id.clone();
    let watch_task_id = task_id.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let Ok(mut sub) = watch_state.event_store.subscribe(&watch_session_id, 0).await else {
            return;
        };
        while let Some(event) = sub.next_event().await {
            if event.trace.task_id.as_ref() == Some(&watch_task_id) && event.kind.is_terminal() {
                break;
            }
        }
        watch_state
            .running_tasks
            .lock()
            .expect("running tasks lock poisoned")
            .remove(&(watch_session_id, watch_task_id));
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateTaskResponse { session_id, task_id, status: "started" }),
    ))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::from(id);
    state.session(&session_id)?;
    let task_id = TaskId::from(task_id);

    let events = state
        .event_store
        .list(&session_id, 0, None)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(derive_task_status(&events, &task_id)))
}

fn derive_task_status(events: &[NormalizedEvent], task_id: &TaskId) -> TaskStatus {
    let mut status = TaskState::Unknown;
    let mut last_seq = 0;
    let mut started_at = None;
    let mut finished_at = None;
    for event in events {
        if event.trace.task_id.as_ref() != Some(task_id) {
            continue;
        }
        last_seq = event.seq;
        match &event.kind {
            aex_core::EventKind::TaskStarted {} => {
                status = TaskState::Running;
                started_at = Some(event.time);
            }
            aex_core::EventKind::TaskCompleted {} => {
                status = TaskState::Completed;
                finished_at = Some(event.time);
            }
            aex_core::EventKind::TaskFailed { .. } => {
                status = TaskState::Failed;
                finished_at = Some(event.time);
            }
            aex_core::EventKind::TaskStopped { .. } => {
                status = TaskState::Stopped;
                finished_at = Some(event.time);
            }
            _ => {}
        }
    }
    TaskStatus { task_id: task_id.clone(), status, last_seq, started_at, finished_at }
}

pub async fn stop_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::from(id);
    state.session(&session_id)?;
    let task_id = TaskId::from(task_id);

    let handle = state
        .running_tasks
        .lock()
        .expect("running tasks lock poisoned")
        .get(&(session_id, task_id.clone()))
        .cloned()
        .ok_or_else(|| ApiError::not_found("unknown task"))?;

    handle.stop("stopped by client request");
    Ok(Json(json!({ "ok": true, "task_id": task_id })))
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub attempt: u32,
    pub input_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct DenyBody {
    pub attempt: u32,
    pub input_hash: String,
    pub reason: Option<String>,
}

fn map_pending_error(err: aex_engine::PendingApprovalError) -> ApiError {
    use aex_engine::PendingApprovalError as E;
    match err {
        E::NotFound => ApiError::not_found(err.to_string()),
        E::AlreadyRegistered => ApiError::conflict_code("already_resolved", err.to_string()),
        E::AttemptMismatch { .. } => ApiError::conflict_code("attempt_mismatch", err.to_string()),
        E::InputHashMismatch => ApiError::conflict_code("input_hash_mismatch", err.to_string()),
    }
}

pub async fn approve_tool_call(
    State(state): State<Arc<AppState>>,
    Path((id, tool_call_id)): Path<(String, String)>,
    Json(body): Json<ApproveBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::from(id);
    state.session(&session_id)?;
    state
        .engine
        .approve_tool_call(&session_id, &ToolCallId::from(tool_call_id), body.attempt, &body.input_hash)
        .map_err(map_pending_error)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn deny_tool_call(
    State(state): State<Arc<AppState>>,
    Path((id, tool_call_id)): Path<(String, String)>,
    Json(body): Json<DenyBody>,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = SessionId::from(id);
    state.session(&session_id)?;
    state
        .engine
        .deny_tool_call(&session_id, &ToolCallId::from(tool_call_id), body.attempt, &body.input_hash, body.reason)
        .map_err(map_pending_error)?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn get_artifact(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
    artifact_response(&state, id, false).await
}

pub async fn download_artifact(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, ApiError> {
    artifact_response(&state, id, true).await
}

async fn artifact_response(state: &AppState, id: String, download: bool) -> Result<Response, ApiError> {
    let artifact_id = aex_core::ArtifactId::from(id);
    let record = state
        .artifact_store
        .get(&artifact_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("unknown artifact"))?;

    let mut response = (StatusCode::OK, record.bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = header::HeaderValue::from_str(&record.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if download {
        let name = record.name.clone().unwrap_or_else(|| record.artifact_id.as_str().to_string());
        if let Ok(value) = header::HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct BundleQuery {
    pub task_id: Option<String>,
}

pub async fn support_bundle(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<BundleQuery>,
) -> Result<Response, ApiError> {
    let session_id = SessionId::from(id);
    let session = state.session(&session_id)?;
    let events = state
        .event_store
        .list(&session_id, 0, None)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let summary = summarize(&state, &session).await?;

    let bytes = crate::bundle::build_support_bundle(&summary, &events, q.task_id.as_deref())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/gzip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        header::HeaderValue::from_str(&format!("attachment; filename=\"{}-support-bundle.tar.gz\"", session_id.as_str()))
            .unwrap_or_else(|_| header::HeaderValue::from_static("attachment; filename=\"support-bundle.tar.gz\"")),
    );
    Ok(response)
}
