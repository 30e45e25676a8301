use crate::subscription::EventSubscription;
use crate::{EventStore, EventStoreError, NewEvent};
use aex_core::{NormalizedEvent, SessionId, TaskId, SCHEMA_VERSION};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, Mutex};

const BROADCAST_CAPACITY: usize = 1024;

struct SessionLog {
    events: Vec<NormalizedEvent>,
    terminal_recorded: HashSet<TaskId>,
    bus: broadcast::Sender<NormalizedEvent>,
}

impl SessionLog {
    fn new() -> Self {
        let (bus, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events: Vec::new(),
            terminal_recorded: HashSet::new(),
            bus,
        }
    }
}

/// In-memory [`EventStore`] used in tests and for sessions that do not
/// need to survive a restart.
pub struct MemoryEventStore {
    sessions: Mutex<HashMap<SessionId, SessionLog>>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        session_id: &SessionId,
        event: NewEvent,
    ) -> Result<NormalizedEvent, EventStoreError> {
        if &event.trace.session_id != session_id {
            return Err(EventStoreError::TraceMismatch {
                expected: session_id.clone(),
                got: event.trace.session_id.clone(),
            });
        }

        let mut sessions = self.sessions.lock().await;
        let log = sessions.entry(session_id.clone()).or_insert_with(SessionLog::new);

        if event.kind.is_terminal() {
            if let Some(task_id) = &event.trace.task_id {
                if log.terminal_recorded.contains(task_id) {
                    let existing = log
                        .events
                        .iter()
                        .rev()
                        .find(|e| e.trace.task_id.as_ref() == Some(task_id) && e.kind.is_terminal())
                        .cloned()
                        .expect("terminal_recorded implies a stored terminal event");
                    return Ok(existing);
                }
                log.terminal_recorded.insert(task_id.clone());
            }
        }

        let seq = log.events.len() as u64 + 1;
        let stamped = NormalizedEvent {
            schema_version: SCHEMA_VERSION,
            seq,
            time: event.time.unwrap_or_else(Utc::now),
            trace: event.trace,
            runtime: event.runtime,
            kind: event.kind,
        };
        log.events.push(stamped.clone());
        let _ = log.bus.send(stamped.clone());
        Ok(stamped)
    }

    async fn list(
        &self,
        session_id: &SessionId,
        after_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<NormalizedEvent>, EventStoreError> {
        let sessions = self.sessions.lock().await;
        let Some(log) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<NormalizedEvent> =
            log.events.iter().filter(|e| e.seq > after_seq).cloned().collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn subscribe(
        &self,
        session_id: &SessionId,
        from_seq: u64,
    ) -> Result<EventSubscription, EventStoreError> {
        let mut sessions = self.sessions.lock().await;
        let log = sessions.entry(session_id.clone()).or_insert_with(SessionLog::new);
        let live = log.bus.subscribe();
        let historical: Vec<NormalizedEvent> =
            log.events.iter().filter(|e| e.seq > from_seq).cloned().collect();
        let last_seq = historical.last().map_or(from_seq, |e| e.seq);
        Ok(EventSubscription::new(historical, last_seq, live))
    }
}
