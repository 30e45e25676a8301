use crate::pending::PendingApprovalError;
use crate::tool_executor::ToolExecutorError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown runtime: {0}")]
    UnknownRuntime(String),
    #[error(transparent)]
    Adapter(#[from] aex_adapter::AdapterError),
    #[error(transparent)]
    EventStore(#[from] aex_events::EventStoreError),
    #[error(transparent)]
    Artifact(#[from] aex_artifacts::ArtifactStoreError),
    #[error(transparent)]
    PendingApproval(#[from] PendingApprovalError),
    #[error(transparent)]
    ToolExecutor(#[from] ToolExecutorError),
}
