//! Builds [`RuntimeEnv`] values for adapters, creating the isolated
//! directory tree a `namespaced`/`ephemeral` session needs and leaving
//! `shared` sessions to use the daemon's own environment untouched.

use aex_core::{sanitize_namespace, Isolation, IsolationLevel, IsolationMode, RuntimeEnv};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeEnvError {
    #[error("failed to create isolation directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Request describing the isolation a new session needs.
#[derive(Debug, Clone)]
pub struct RuntimeEnvRequest {
    pub credential_namespace: String,
    pub session_id: Option<String>,
    pub level: IsolationLevel,
    pub mode: IsolationMode,
    pub cwd: PathBuf,
    pub base_env: BTreeMap<String, String>,
}

/// Owns the temp directory backing an `ephemeral` runtime-env, if any, so
/// that it is cleaned up when the session ends.
pub struct BuiltRuntimeEnv {
    pub env: RuntimeEnv,
    _ephemeral_dir: Option<TempDir>,
}

impl BuiltRuntimeEnv {
    #[must_use]
    pub fn env(&self) -> &RuntimeEnv {
        &self.env
    }
}

/// Builds runtime-env instances rooted under one base directory.
pub struct RuntimeEnvBuilder {
    base_dir: PathBuf,
}

impl RuntimeEnvBuilder {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn build(&self, req: &RuntimeEnvRequest) -> Result<BuiltRuntimeEnv, RuntimeEnvError> {
        if req.level == IsolationLevel::Shared {
            return Ok(BuiltRuntimeEnv {
                env: RuntimeEnv {
                    cwd: req.cwd.clone(),
                    env: req.base_env.clone(),
                    credential_namespace: req.credential_namespace.clone(),
                    isolation: Isolation {
                        level: req.level,
                        mode: req.mode,
                        home_dir: None,
                        xdg_config_home: None,
                        xdg_state_home: None,
                        xdg_cache_home: None,
                    },
                },
                _ephemeral_dir: None,
            });
        }

        let sanitized = sanitize_namespace(&req.credential_namespace);
        let mut ephemeral_dir = None;
        let root: PathBuf = if req.level == IsolationLevel::Ephemeral {
            let dir = TempDir::new().map_err(|source| RuntimeEnvError::CreateDir {
                path: std::env::temp_dir(),
                source,
            })?;
            let path = dir.path().to_path_buf();
            ephemeral_dir = Some(dir);
            path
        } else {
            let mut root = self.base_dir.join(&sanitized);
            if let Some(session_id) = &req.session_id {
                root = root.join(format!("session-{session_id}"));
            }
            root
        };

        let home = self.ensure_dir(&root, "home")?;
        let config = self.ensure_dir(&root, "config")?;
        let state = self.ensure_dir(&root, "state")?;
        let cache = self.ensure_dir(&root, "cache")?;

        let mut env = req.base_env.clone();
        env.insert("HOME".to_string(), home.to_string_lossy().into_owned());
        env.insert("XDG_CONFIG_HOME".to_string(), config.to_string_lossy().into_owned());
        env.insert("XDG_STATE_HOME".to_string(), state.to_string_lossy().into_owned());
        env.insert("XDG_CACHE_HOME".to_string(), cache.to_string_lossy().into_owned());

        Ok(BuiltRuntimeEnv {
            env: RuntimeEnv {
                cwd: req.cwd.clone(),
                env,
                credential_namespace: req.credential_namespace.clone(),
                isolation: Isolation {
                    level: req.level,
                    mode: req.mode,
                    home_dir: Some(home),
                    xdg_config_home: Some(config),
                    xdg_state_home: Some(state),
                    xdg_cache_home: Some(cache),
                },
            },
            _ephemeral_dir: ephemeral_dir,
        })
    }

    fn ensure_dir(&self, root: &Path, leaf: &str) -> Result<PathBuf, RuntimeEnvError> {
        let dir = root.join(leaf);
        std::fs::create_dir_all(&dir).map_err(|source| RuntimeEnvError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(level: IsolationLevel) -> RuntimeEnvRequest {
        RuntimeEnvRequest {
            credential_namespace: "acme corp".to_string(),
            session_id: Some("abc123".to_string()),
            level,
            mode: IsolationMode::Subprocess,
            cwd: PathBuf::from("."),
            base_env: BTreeMap::new(),
        }
    }

    #[test]
    fn shared_isolation_does_not_touch_the_filesystem() {
        let builder = RuntimeEnvBuilder::new("/nonexistent/base");
        let built = builder.build(&request(IsolationLevel::Shared)).unwrap();
        assert!(built.env().isolation.home_dir.is_none());
    }

    #[test]
    fn namespaced_isolation_creates_sanitized_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = RuntimeEnvBuilder::new(tmp.path());
        let built = builder.build(&request(IsolationLevel::Namespaced)).unwrap();
        let home = built.env().isolation.home_dir.as_ref().unwrap();
        assert!(home.exists());
        assert!(home.to_string_lossy().contains("acme_corp"));
        assert!(home.to_string_lossy().contains("session-abc123"));
        assert_eq!(built.env().env.get("HOME").unwrap(), &home.to_string_lossy());
    }

    #[test]
    fn ephemeral_isolation_uses_a_temp_dir_per_build() {
        let builder = RuntimeEnvBuilder::new("/nonexistent/base");
        let a = builder.build(&request(IsolationLevel::Ephemeral)).unwrap();
        let b = builder.build(&request(IsolationLevel::Ephemeral)).unwrap();
        assert_ne!(a.env().isolation.home_dir, b.env().isolation.home_dir);
    }

    #[test]
    fn all_four_xdg_vars_are_exported() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = RuntimeEnvBuilder::new(tmp.path());
        let built = builder.build(&request(IsolationLevel::Namespaced)).unwrap();
        for key in ["HOME", "XDG_CONFIG_HOME", "XDG_STATE_HOME", "XDG_CACHE_HOME"] {
            assert!(built.env().env.contains_key(key), "missing {key}");
        }
    }
}
