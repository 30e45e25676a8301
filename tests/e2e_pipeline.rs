//! End-to-end pipeline test exercising the full session → task → event flow
//! through the real HTTP surface, backed by in-memory stores and a mock
//! adapter — no network socket involved.

use std::collections::HashMap;
use std::sync::Arc;

use aex_adapter::Adapter;
use aex_artifacts::{ArtifactStore, MemoryArtifactStore};
use aex_core::{EventKind, SessionId, TaskId, ToolCallId};
use aex_engine::{Engine, EngineConfig, EchoToolExecutor};
use aex_events::{EventStore, MemoryEventStore};
use aex_mock_adapter::{echo_tool_script, MockAdapter};
use aex_runtime_env::RuntimeEnvBuilder;
use aex_server::{build_app, AppState, ServerConfig};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn app() -> Arc<AppState> {
    let event_store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
    let artifact_store: Arc<dyn ArtifactStore> = Arc::new(MemoryArtifactStore::new());
    let engine = Arc::new(Engine::new(
        Arc::clone(&event_store),
        Arc::clone(&artifact_store),
        Arc::new(EchoToolExecutor),
        EngineConfig::default(),
    ));

    let tool_call_id = ToolCallId::from("tc1");
    let adapter: Arc<dyn Adapter> = Arc::new(MockAdapter::new("mock", move |task_id, _input| {
        echo_tool_script(SessionId::from("placeholder"), task_id.clone(), tool_call_id.clone(), "workspace.read", serde_json::json!({"path": "a"}))
    }));
    let mut adapters = HashMap::new();
    adapters.insert("mock".to_string(), adapter);

    let tmp = tempfile::tempdir().expect("tempdir");
    let runtime_env_builder = RuntimeEnvBuilder::new(tmp.keep());

    Arc::new(AppState::new(
        ServerConfig::default(),
        event_store,
        artifact_store,
        engine,
        adapters,
        runtime_env_builder,
    ))
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn session_then_task_reaches_completed_via_http() {
    let state = app();

    let create_session = Request::builder()
        .method("POST")
        .uri("/sessions")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&serde_json::json!({"runtime": "mock"})).unwrap()))
        .unwrap();
    let resp = build_app(Arc::clone(&state)).oneshot(create_session).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let session_body = json_body(resp).await;
    let session_id = session_body["session_id"].as_str().unwrap().to_string();

    let create_task = Request::builder()
        .method("POST")
        .uri(format!("/sessions/{session_id}/tasks"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&serde_json::json!({"messages": [{"role": "user", "content": "hi"}]})).unwrap()))
        .unwrap();
    let resp = build_app(Arc::clone(&state)).oneshot(create_task).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let task_body = json_body(resp).await;
    let task_id = task_body["task_id"].as_str().unwrap().to_string();

    let mut status = String::new();
    for _ in 0..200 {
        let get_task = Request::builder()
            .uri(format!("/sessions/{session_id}/tasks/{task_id}"))
            .body(Body::empty())
            .unwrap();
        let resp = build_app(Arc::clone(&state)).oneshot(get_task).await.unwrap();
        let body = json_body(resp).await;
        status = body["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(status, "completed");

    let get_events = Request::builder()
        .uri(format!("/sessions/{session_id}/events"))
        .body(Body::empty())
        .unwrap();
    let resp = build_app(Arc::clone(&state)).oneshot(get_events).await.unwrap();
    let body = json_body(resp).await;
    let kinds: Vec<&str> = body["events"].as_array().unwrap().iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"task.started"));
    assert!(kinds.contains(&"task.completed"));
}

#[tokio::test]
async fn unknown_session_returns_404() {
    let state = app();
    let req = Request::builder().uri("/sessions/does-not-exist").body(Body::empty()).unwrap();
    let resp = build_app(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_task_emits_task_stopped() {
    let state = app();

    let create_session = Request::builder()
        .method("POST")
        .uri("/sessions")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&serde_json::json!({"runtime": "mock", "permissionMode": "ask"})).unwrap()))
        .unwrap();
    let resp = build_app(Arc::clone(&state)).oneshot(create_session).await.unwrap();
    let session_id = json_body(resp).await["session_id"].as_str().unwrap().to_string();

    let create_task = Request::builder()
        .method("POST")
        .uri(format!("/sessions/{session_id}/tasks"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&serde_json::json!({"messages": []})).unwrap()))
        .unwrap();
    let resp = build_app(Arc::clone(&state)).oneshot(create_task).await.unwrap();
    let task_id = json_body(resp).await["task_id"].as_str().unwrap().to_string();

    // Give the run a moment to reach the ask-mode suspend point before stopping.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let stop = Request::builder()
        .method("POST")
        .uri(format!("/sessions/{session_id}/tasks/{task_id}/stop"))
        .body(Body::empty())
        .unwrap();
    let resp = build_app(Arc::clone(&state)).oneshot(stop).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let target_task_id = TaskId::from(task_id);
    let session_id = SessionId::from(session_id);
    let mut saw_stop = false;
    for _ in 0..200 {
        let events = state.event_store.list(&session_id, 0, None).await.unwrap();
        if events.iter().any(|e| {
            e.trace.task_id.as_ref() == Some(&target_task_id)
                && matches!(e.kind, EventKind::TaskStopped { .. })
        }) {
            saw_stop = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(saw_stop, "expected a task.stopped event after stop_task");
}
