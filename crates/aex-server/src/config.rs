use aex_core::PermissionMode;
use std::time::Duration;

/// Tuning knobs for the HTTP/SSE layer. Exposed as CLI flags by the daemon
/// binary rather than hardcoded, so the backpressure policy can be turned
/// without a rebuild.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub default_runtime: String,
    pub default_permission_mode: PermissionMode,
    pub max_inflight_tasks: usize,
    pub max_sse_clients: usize,
    pub rate_limit_capacity: u32,
    pub rate_limit_window: Duration,
    pub close_on_backpressure: bool,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "agent-exec-daemon".to_string(),
            default_runtime: "mock".to_string(),
            default_permission_mode: PermissionMode::Auto,
            max_inflight_tasks: 32,
            max_sse_clients: 64,
            rate_limit_capacity: 60,
            rate_limit_window: Duration::from_secs(60),
            close_on_backpressure: true,
            max_body_bytes: 1024 * 1024,
        }
    }
}
