//! HTTP/SSE control plane for the agent-exec daemon.
//!
//! Wraps an [`Engine`] plus the event/artifact stores and a named-adapter
//! registry behind the wire surface. Everything concurrency-sensitive that
//! is a property of *exposing* the engine over the network rather than of
//! the engine itself — rate limiting, task-admission backpressure, SSE
//! client caps — lives here, not in `aex-engine`.

mod bundle;
mod config;
mod error;
mod handlers;
mod middleware;
mod ratelimit;
mod sse;

pub use config::ServerConfig;
pub use error::ApiError;

use aex_adapter::{Adapter, AdapterSessionHandle};
use aex_artifacts::ArtifactStore;
use aex_core::{RuntimeEnv, Session, SessionId, TaskId};
use aex_engine::{Engine, TaskRunHandle};
use aex_events::EventStore;
use aex_runtime_env::RuntimeEnvBuilder;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Semaphore;
use tower_http::limit::RequestBodyLimitLayer;

/// A created session plus everything a later task needs to run against it
/// without re-deriving it: the built runtime environment and whatever
/// adapter-side session handle `create_session` returned.
pub(crate) struct SessionRecord {
    pub session: Session,
    pub env: RuntimeEnv,
    pub session_handle: AdapterSessionHandle,
}

/// Everything handlers need, shared behind an `Arc` and cloned per request
/// via Axum's `State` extractor.
pub struct AppState {
    pub config: ServerConfig,
    pub event_store: Arc<dyn EventStore>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub engine: Arc<Engine>,
    pub adapters: HashMap<String, Arc<dyn Adapter>>,
    pub runtime_env_builder: RuntimeEnvBuilder,
    pub(crate) sessions: StdMutex<BTreeMap<SessionId, SessionRecord>>,
    pub(crate) running_tasks: StdMutex<HashMap<(SessionId, TaskId), Arc<TaskRunHandle>>>,
    pub(crate) rate_limiter: ratelimit::RateLimiter,
    pub(crate) inflight_tasks: Arc<Semaphore>,
    pub(crate) sse_clients: AtomicUsize,
    pub(crate) sse_backpressure_drops: AtomicUsize,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: ServerConfig,
        event_store: Arc<dyn EventStore>,
        artifact_store: Arc<dyn ArtifactStore>,
        engine: Arc<Engine>,
        adapters: HashMap<String, Arc<dyn Adapter>>,
        runtime_env_builder: RuntimeEnvBuilder,
    ) -> Self {
        let rate_limiter = ratelimit::RateLimiter::new(config.rate_limit_capacity, config.rate_limit_window);
        let inflight_tasks = Arc::new(Semaphore::new(config.max_inflight_tasks));
        Self {
            config,
            event_store,
            artifact_store,
            engine,
            adapters,
            runtime_env_builder,
            sessions: StdMutex::new(BTreeMap::new()),
            running_tasks: StdMutex::new(HashMap::new()),
            rate_limiter,
            inflight_tasks,
            sse_clients: AtomicUsize::new(0),
            sse_backpressure_drops: AtomicUsize::new(0),
        }
    }

    pub(crate) fn adapter(&self, runtime: &str) -> Result<Arc<dyn Adapter>, ApiError> {
        self.adapters
            .get(runtime)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("unknown runtime {runtime}")))
    }

    pub(crate) fn session(&self, session_id: &SessionId) -> Result<Session, ApiError> {
        self.sessions
            .lock()
            .expect("sessions lock poisoned")
            .get(session_id)
            .map(|r| r.session.clone())
            .ok_or_else(|| ApiError::not_found(format!("unknown session {session_id}")))
    }
}

/// Builds the router with every route, the body-size limit, and the
/// request-id/logging middleware layered on.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_body_bytes;
    let rate_limit_state = Arc::clone(&state);
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/capabilities", get(handlers::capabilities))
        .route("/auth/status", get(handlers::auth_status))
        .route("/metrics", get(handlers::metrics))
        .route("/sessions", get(handlers::list_sessions).post(handlers::create_session))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/events", get(handlers::session_events))
        .route("/sessions/{id}/tasks", post(handlers::create_task))
        .route("/sessions/{id}/tasks/{task_id}", get(handlers::get_task))
        .route("/sessions/{id}/tasks/{task_id}/stop", post(handlers::stop_task))
        .route(
            "/sessions/{id}/tool-calls/{tool_call_id}/approve",
            post(handlers::approve_tool_call),
        )
        .route(
            "/sessions/{id}/tool-calls/{tool_call_id}/deny",
            post(handlers::deny_tool_call),
        )
        .route("/sessions/{id}/support-bundle", get(handlers::support_bundle))
        .route("/artifacts/{id}", get(handlers::get_artifact))
        .route("/artifacts/{id}/download", get(handlers::download_artifact))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(axum::middleware::from_fn_with_state(rate_limit_state, middleware::rate_limit_middleware))
        .with_state(state)
}
