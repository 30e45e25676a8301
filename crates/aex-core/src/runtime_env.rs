//! The `RuntimeEnv` data shape passed to every adapter. Building one (the
//! filesystem isolation tree and sanitization) lives in `aex-runtime-env`;
//! this crate only defines the shape so that `aex-adapter` can reference it
//! without depending on the builder.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    Shared,
    Namespaced,
    Ephemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    InProcess,
    Subprocess,
    ServerSide,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Isolation {
    pub level: IsolationLevel,
    pub mode: IsolationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xdg_config_home: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xdg_state_home: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xdg_cache_home: Option<PathBuf>,
}

/// Filesystem and environment-variable namespace handed to an adapter for
/// credential isolation. Adapters MUST receive all configuration through
/// this struct; the daemon never mutates its own process-wide environment
/// to pass configuration down.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeEnv {
    pub cwd: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub credential_namespace: String,
    pub isolation: Isolation,
}

/// Replace any byte outside `[A-Za-z0-9._-]` with `_`, as required when
/// deriving a filesystem path segment from a credential namespace.
#[must_use]
pub fn sanitize_namespace(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(sanitize_namespace("a/b c:d"), "a_b_c_d");
    }

    #[test]
    fn sanitize_preserves_allowed_characters() {
        assert_eq!(sanitize_namespace("a.b_c-1"), "a.b_c-1");
    }
}
