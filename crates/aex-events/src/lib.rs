//! Append-only per-session normalized event log.
//!
//! Two backends implement [`EventStore`]: [`MemoryEventStore`] for tests
//! and short-lived runs, and [`SqliteEventStore`] for durable storage that
//! survives a daemon restart. Both guarantee the same three invariants:
//! sequence numbers are dense per session starting at 1, a subscriber that
//! observes `seq = N` is guaranteed to read `seq = N` on a fresh `list`,
//! and at most one terminal event is ever recorded per `(session_id,
//! task_id)`.

mod memory;
mod sqlite;
mod subscription;

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;
pub use subscription::EventSubscription;

use aex_core::{EventKind, NormalizedEvent, RuntimeInfo, SessionId, TraceInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The fields a caller supplies to append one event; the store fills in
/// `seq`, `time` (if absent) and `schema_version`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub trace: TraceInfo,
    pub runtime: RuntimeInfo,
    pub kind: EventKind,
    pub time: Option<DateTime<Utc>>,
}

impl NewEvent {
    #[must_use]
    pub fn new(trace: TraceInfo, runtime: RuntimeInfo, kind: EventKind) -> Self {
        Self {
            trace,
            runtime,
            kind,
            time: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("event's trace.session_id {got} does not match owning session {expected}")]
    TraceMismatch { expected: SessionId, got: SessionId },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to (de)serialize stored event: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Append-only per-session event log with live subscription.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Assigns the next `seq`, validates `trace.session_id`, persists, and
    /// broadcasts to current live subscribers. The returned event is the
    /// fully-stamped record, including the assigned `seq` and `time`.
    ///
    /// If `event.kind` is a terminal kind and a terminal event has already
    /// been recorded for this `(session_id, task_id)`, the existing
    /// terminal event is returned unchanged and nothing new is appended.
    async fn append(
        &self,
        session_id: &SessionId,
        event: NewEvent,
    ) -> Result<NormalizedEvent, EventStoreError>;

    /// In-order slice of events with `seq > after_seq`, optionally capped.
    async fn list(
        &self,
        session_id: &SessionId,
        after_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<NormalizedEvent>, EventStoreError>;

    /// A lazy, restartable subscription: all historical events with
    /// `seq > from_seq` first, then live events as they are appended.
    async fn subscribe(
        &self,
        session_id: &SessionId,
        from_seq: u64,
    ) -> Result<EventSubscription, EventStoreError>;
}

#[cfg(test)]
mod contract_tests {
    //! Shared property tests run against every backend so the two
    //! implementations cannot silently drift apart in semantics.
    use super::*;
    use aex_core::{RuntimeInfo, TaskId, TraceInfo};

    fn trace(session_id: &SessionId, task_id: &TaskId) -> TraceInfo {
        TraceInfo::for_task(session_id.clone(), task_id.clone())
    }

    fn runtime() -> RuntimeInfo {
        RuntimeInfo {
            name: "mock".to_string(),
            model: None,
            runtime_session_id: None,
        }
    }

    async fn assert_monotonic_and_round_trips(store: &dyn EventStore) {
        let session_id = SessionId::from("s1");
        let task_id = TaskId::from("t1");
        for _ in 0..3 {
            store
                .append(
                    &session_id,
                    NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskStarted {}),
                )
                .await
                .unwrap();
        }
        let events = store.list(&session_id, 0, None).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    async fn assert_trace_mismatch_rejected(store: &dyn EventStore) {
        let session_id = SessionId::from("s1");
        let other = SessionId::from("s2");
        let task_id = TaskId::from("t1");
        let err = store
            .append(
                &session_id,
                NewEvent::new(trace(&other, &task_id), runtime(), EventKind::TaskStarted {}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TraceMismatch { .. }));
    }

    async fn assert_terminal_idempotent(store: &dyn EventStore) {
        let session_id = SessionId::from("s1");
        let task_id = TaskId::from("t1");
        let first = store
            .append(
                &session_id,
                NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskCompleted {}),
            )
            .await
            .unwrap();
        let second = store
            .append(
                &session_id,
                NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskFailed {
                    error: "should be ignored".to_string(),
                    retryable: None,
                }),
            )
            .await
            .unwrap();
        assert_eq!(first.seq, second.seq);
        assert!(matches!(second.kind, EventKind::TaskCompleted {}));
        assert_eq!(store.list(&session_id, 0, None).await.unwrap().len(), 1);
    }

    async fn assert_subscribe_replays_history_then_live(store: &dyn EventStore) {
        let session_id = SessionId::from("s1");
        let task_id = TaskId::from("t1");
        store
            .append(
                &session_id,
                NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskStarted {}),
            )
            .await
            .unwrap();

        let mut sub = store.subscribe(&session_id, 0).await.unwrap();
        let historical = sub.next_event().await.unwrap();
        assert_eq!(historical.seq, 1);

        store
            .append(
                &session_id,
                NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskCompleted {}),
            )
            .await
            .unwrap();
        let live = sub.next_event().await.unwrap();
        assert_eq!(live.seq, 2);
    }

    #[tokio::test]
    async fn memory_store_satisfies_the_contract() {
        assert_monotonic_and_round_trips(&MemoryEventStore::new()).await;
        assert_trace_mismatch_rejected(&MemoryEventStore::new()).await;
        assert_terminal_idempotent(&MemoryEventStore::new()).await;
        assert_subscribe_replays_history_then_live(&MemoryEventStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_satisfies_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        assert_monotonic_and_round_trips(&SqliteEventStore::open(dir.path().join("a.sqlite3")).unwrap()).await;
        assert_trace_mismatch_rejected(&SqliteEventStore::open(dir.path().join("b.sqlite3")).unwrap()).await;
        assert_terminal_idempotent(&SqliteEventStore::open(dir.path().join("c.sqlite3")).unwrap()).await;
        assert_subscribe_replays_history_then_live(&SqliteEventStore::open(dir.path().join("d.sqlite3")).unwrap())
            .await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.sqlite3");
        let session_id = SessionId::from("s1");
        let task_id = TaskId::from("t1");
        {
            let store = SqliteEventStore::open(&path).unwrap();
            store
                .append(
                    &session_id,
                    NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskStarted {}),
                )
                .await
                .unwrap();
        }
        let reopened = SqliteEventStore::open(&path).unwrap();
        let events = reopened.list(&session_id, 0, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);

        let appended = reopened
            .append(
                &session_id,
                NewEvent::new(trace(&session_id, &task_id), runtime(), EventKind::TaskCompleted {}),
            )
            .await
            .unwrap();
        assert_eq!(appended.seq, 2, "seq must continue from the persisted high-water mark");
    }
}
