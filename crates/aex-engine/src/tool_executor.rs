//! The external tool-execution boundary. No concrete workspace tool lives
//! in this workspace — callers supply a [`ToolExecutor`]; [`EchoToolExecutor`]
//! stands in for tests and local development.

use aex_core::OutputStream;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cancel::CancellationToken;

#[derive(Debug, Clone)]
pub struct ToolExecutionOutcome {
    pub output: Value,
    pub is_error: bool,
    pub sandbox_summary: Option<String>,
    /// Defaults to `codesdk_host` if the executor doesn't report one.
    pub execution_env: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolExecutorError {
    #[error("tool execution failed: {0}")]
    Failed(String),
}

/// Runs one tool call, streaming stdout/stderr chunks over `chunk_tx` as
/// they arrive. Implementations should poll `cancellation` and stop
/// promptly (best-effort) once it fires.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        input: &Value,
        chunk_tx: mpsc::Sender<(OutputStream, String)>,
        cancellation: CancellationToken,
    ) -> Result<ToolExecutionOutcome, ToolExecutorError>;
}

/// Echoes `input` back as `output` with no streamed chunks. Used by engine
/// tests in place of a real tool.
pub struct EchoToolExecutor;

#[async_trait]
impl ToolExecutor for EchoToolExecutor {
    async fn execute(
        &self,
        _name: &str,
        input: &Value,
        _chunk_tx: mpsc::Sender<(OutputStream, String)>,
        _cancellation: CancellationToken,
    ) -> Result<ToolExecutionOutcome, ToolExecutorError> {
        Ok(ToolExecutionOutcome {
            output: input.clone(),
            is_error: false,
            sandbox_summary: None,
            execution_env: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn echo_executor_returns_the_input_as_output() {
        let (tx, _rx) = mpsc::channel(4);
        let outcome = EchoToolExecutor
            .execute("workspace.read", &json!({"path": "a"}), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.output, json!({"path": "a"}));
        assert!(!outcome.is_error);
    }
}
