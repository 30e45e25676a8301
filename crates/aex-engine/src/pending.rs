//! Pending tool-call approvals: a side-table keyed by `(session_id,
//! tool_call_id)`, resolved either by an `approve_tool_call`/`deny_tool_call`
//! RPC or by task cancellation, through the same `oneshot` channel either
//! way.

use aex_core::{SessionId, TaskId, ToolCallId};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub enum ApprovalResolution {
    Approved,
    Denied { reason: String },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PendingApprovalError {
    #[error("a pending approval is already registered for this tool call")]
    AlreadyRegistered,
    #[error("no pending approval for this tool call")]
    NotFound,
    #[error("attempt {given} does not match the pending attempt {expected}")]
    AttemptMismatch { expected: u32, given: u32 },
    #[error("input_hash does not match the pending record")]
    InputHashMismatch,
}

struct PendingEntry {
    attempt: u32,
    input_hash: String,
    task_id: TaskId,
    resolver: Option<oneshot::Sender<ApprovalResolution>>,
}

/// At most one pending entry per `(session_id, tool_call_id)` key.
#[derive(Default)]
pub struct PendingApprovals {
    entries: Mutex<HashMap<(SessionId, ToolCallId), PendingEntry>>,
}

impl PendingApprovals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        session_id: SessionId,
        tool_call_id: ToolCallId,
        attempt: u32,
        input_hash: String,
        task_id: TaskId,
    ) -> Result<oneshot::Receiver<ApprovalResolution>, PendingApprovalError> {
        let mut entries = self.entries.lock().expect("pending approvals lock poisoned");
        let key = (session_id, tool_call_id);
        if entries.contains_key(&key) {
            return Err(PendingApprovalError::AlreadyRegistered);
        }
        let (resolver, receiver) = oneshot::channel();
        entries.insert(
            key,
            PendingEntry {
                attempt,
                input_hash,
                task_id,
                resolver: Some(resolver),
            },
        );
        Ok(receiver)
    }

    fn take_matching(
        &self,
        session_id: &SessionId,
        tool_call_id: &ToolCallId,
        attempt: u32,
        input_hash: &str,
    ) -> Result<oneshot::Sender<ApprovalResolution>, PendingApprovalError> {
        let mut entries = self.entries.lock().expect("pending approvals lock poisoned");
        let key = (session_id.clone(), tool_call_id.clone());
        {
            let entry = entries.get(&key).ok_or(PendingApprovalError::NotFound)?;
            if entry.attempt != attempt {
                return Err(PendingApprovalError::AttemptMismatch {
                    expected: entry.attempt,
                    given: attempt,
                });
            }
            if entry.input_hash != input_hash {
                return Err(PendingApprovalError::InputHashMismatch);
            }
        }
        let entry = entries.remove(&key).expect("checked present above");
        entry.resolver.ok_or(PendingApprovalError::NotFound)
    }

    /// Resolves a pending entry as approved or denied, checking `attempt`
    /// and `input_hash` against the registered record. The RPC identity
    /// checks live here so both `approve_tool_call` and `deny_tool_call`
    /// share one code path.
    pub fn resolve(
        &self,
        session_id: &SessionId,
        tool_call_id: &ToolCallId,
        attempt: u32,
        input_hash: &str,
        approved: bool,
        reason: Option<String>,
    ) -> Result<(), PendingApprovalError> {
        let resolver = self.take_matching(session_id, tool_call_id, attempt, input_hash)?;
        let resolution = if approved {
            ApprovalResolution::Approved
        } else {
            ApprovalResolution::Denied {
                reason: reason.unwrap_or_else(|| "denied".to_string()),
            }
        };
        let _ = resolver.send(resolution);
        Ok(())
    }

    /// Resolves every pending entry belonging to `task_id` as denied with
    /// `reason` — used by cancellation and by task-end cleanup.
    pub fn resolve_all_for_task(&self, task_id: &TaskId, reason: &str) {
        let mut entries = self.entries.lock().expect("pending approvals lock poisoned");
        let keys: Vec<_> = entries
            .iter()
            .filter(|(_, entry)| &entry.task_id == task_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            if let Some(mut entry) = entries.remove(&key) {
                if let Some(resolver) = entry.resolver.take() {
                    let _ = resolver.send(ApprovalResolution::Denied {
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, ToolCallId, TaskId) {
        (SessionId::from("s1"), ToolCallId::from("tc1"), TaskId::from("t1"))
    }

    #[tokio::test]
    async fn registering_twice_for_the_same_key_errors() {
        let pending = PendingApprovals::new();
        let (session_id, tool_call_id, task_id) = ids();
        pending
            .register(session_id.clone(), tool_call_id.clone(), 1, "h".into(), task_id.clone())
            .unwrap();
        let err = pending
            .register(session_id, tool_call_id, 1, "h".into(), task_id)
            .unwrap_err();
        assert_eq!(err, PendingApprovalError::AlreadyRegistered);
    }

    #[tokio::test]
    async fn resolve_rejects_attempt_mismatch() {
        let pending = PendingApprovals::new();
        let (session_id, tool_call_id, task_id) = ids();
        let _rx = pending
            .register(session_id.clone(), tool_call_id.clone(), 1, "h".into(), task_id)
            .unwrap();
        let err = pending
            .resolve(&session_id, &tool_call_id, 2, "h", true, None)
            .unwrap_err();
        assert_eq!(err, PendingApprovalError::AttemptMismatch { expected: 1, given: 2 });
    }

    #[tokio::test]
    async fn resolve_rejects_input_hash_mismatch() {
        let pending = PendingApprovals::new();
        let (session_id, tool_call_id, task_id) = ids();
        let _rx = pending
            .register(session_id.clone(), tool_call_id.clone(), 1, "h".into(), task_id)
            .unwrap();
        let err = pending
            .resolve(&session_id, &tool_call_id, 1, "different", true, None)
            .unwrap_err();
        assert_eq!(err, PendingApprovalError::InputHashMismatch);
    }

    #[tokio::test]
    async fn approval_delivers_through_the_oneshot() {
        let pending = PendingApprovals::new();
        let (session_id, tool_call_id, task_id) = ids();
        let rx = pending
            .register(session_id.clone(), tool_call_id.clone(), 1, "h".into(), task_id)
            .unwrap();
        pending.resolve(&session_id, &tool_call_id, 1, "h", true, None).unwrap();
        assert!(matches!(rx.await.unwrap(), ApprovalResolution::Approved));
    }

    #[tokio::test]
    async fn resolve_all_for_task_denies_every_matching_entry() {
        let pending = PendingApprovals::new();
        let session_id = SessionId::from("s1");
        let task_id = TaskId::from("t1");
        let rx1 = pending
            .register(session_id.clone(), ToolCallId::from("tc1"), 1, "h".into(), task_id.clone())
            .unwrap();
        let rx2 = pending
            .register(session_id.clone(), ToolCallId::from("tc2"), 1, "h".into(), task_id.clone())
            .unwrap();
        pending.resolve_all_for_task(&task_id, "task ended");
        assert!(matches!(rx1.await.unwrap(), ApprovalResolution::Denied { reason } if reason == "task ended"));
        assert!(matches!(rx2.await.unwrap(), ApprovalResolution::Denied { .. }));
    }

    #[tokio::test]
    async fn resolving_an_unregistered_key_errors() {
        let pending = PendingApprovals::new();
        let (session_id, tool_call_id, _task_id) = ids();
        let err = pending.resolve(&session_id, &tool_call_id, 1, "h", true, None).unwrap_err();
        assert_eq!(err, PendingApprovalError::NotFound);
    }
}
