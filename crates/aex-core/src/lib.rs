//! Domain types shared by every crate in the agent-exec daemon workspace.
//!
//! Nothing in this crate depends on tokio, axum, or a storage backend — it
//! is the stable vocabulary every other crate speaks: sessions, tasks,
//! normalized events, artifacts, and policy snapshots, plus the canonical
//! JSON hashing used to fingerprint any of them.

pub mod artifact;
pub mod canonical;
pub mod event;
pub mod ids;
pub mod policy;
pub mod runtime_env;
pub mod session;

pub use artifact::{ArtifactRecord, ArtifactRef};
pub use canonical::{canonical_json, hash_canonical, sha256_hex, sha256_prefixed, CanonicalizeError};
pub use event::{
    ContentBlock, ContextWindowMeta, DeltaKind, EventKind, ExecutedBy, NormalizedEvent,
    OutputStream, RuntimeInfo, TraceInfo, SCHEMA_VERSION,
};
pub use ids::{ArtifactId, SessionId, TaskId, ToolCallId};
pub use policy::{
    DecisionKind, PermissionMode, PolicyEvaluation, PolicyOverrides, PolicySnapshot, PolicySource,
    ToolCallIdentity, ToolPermission,
};
pub use runtime_env::{sanitize_namespace, Isolation, IsolationLevel, IsolationMode, RuntimeEnv};
pub use session::{Session, SessionSummary, TaskInput, TaskState, TaskStatus};

/// Contract version advertised at `GET /` and stamped into artifacts.
pub const CONTRACT_VERSION: &str = "aex/v1";
