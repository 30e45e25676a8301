//! Request-id stamping, structured per-request logging, and per-remote-
//! address rate limiting. Ambient concerns carried over from the daemon
//! tooling this workspace's stack is built on, not named by the wire surface
//! but present in every complete daemon.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// A unique request identifier, available as an Axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&id.0.to_string()).expect("uuid is header-safe"),
    );
    resp
}

/// Rejects requests that exceed the per-remote-address token bucket with a
/// 429 and `Retry-After`. Requires `ConnectInfo<SocketAddr>` to be populated,
/// i.e. the server must be served via `into_make_service_with_connect_info`.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match state.rate_limiter.check(addr.ip()) {
        Ok(()) => Ok(next.run(req).await),
        Err(retry_after_secs) => Err(ApiError::rate_limited(retry_after_secs)),
    }
}

pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    let duration = start.elapsed();
    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = duration.as_millis() as u64,
        "request completed"
    );

    resp
}
