use crate::subscription::EventSubscription;
use crate::{EventStore, EventStoreError, NewEvent};
use aex_core::{EventKind, NormalizedEvent, RuntimeInfo, SessionId, TaskId, TraceInfo, SCHEMA_VERSION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::{broadcast, Mutex};

const BROADCAST_CAPACITY: usize = 1024;

/// Per-session state not persisted in SQL: the live broadcast bus and a
/// cache of which tasks already have a recorded terminal event, so the
/// idempotent-terminal check does not require a query on every append.
struct SessionState {
    bus: broadcast::Sender<NormalizedEvent>,
    terminal_recorded: HashSet<TaskId>,
}

impl SessionState {
    fn new() -> Self {
        let (bus, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            bus,
            terminal_recorded: HashSet::new(),
        }
    }
}

struct Inner {
    conn: Connection,
    session_state: HashMap<SessionId, SessionState>,
}

/// Durable [`EventStore`] backed by SQLite. Survives process restart: the
/// next `seq` for a session is recovered from `MAX(seq)` on first touch
/// after reopening.
pub struct SqliteEventStore {
    inner: Mutex<Inner>,
}

impl SqliteEventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventStoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init_schema(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                session_state: HashMap::new(),
            }),
        })
    }

    #[must_use]
    pub fn open_in_memory() -> Result<Self, EventStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                session_state: HashMap::new(),
            }),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), EventStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                time TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                type TEXT NOT NULL,
                task_id TEXT,
                runtime_name TEXT NOT NULL,
                trace_json TEXT NOT NULL,
                runtime_json TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_events_task ON events(session_id, task_id);
            "#,
        )?;
        Ok(())
    }

    fn row_to_event(
        seq: u64,
        time: DateTime<Utc>,
        schema_version: u32,
        trace_json: &str,
        runtime_json: &str,
        payload_json: &str,
    ) -> Result<NormalizedEvent, EventStoreError> {
        let trace: TraceInfo = serde_json::from_str(trace_json)?;
        let runtime: RuntimeInfo = serde_json::from_str(runtime_json)?;
        let kind: EventKind = serde_json::from_str(payload_json)?;
        Ok(NormalizedEvent {
            schema_version,
            seq,
            time,
            trace,
            runtime,
            kind,
        })
    }

    /// Ensures `session_state` has an entry for `session_id`, recovering
    /// `terminal_recorded` from disk on first touch so a restart cannot
    /// resurrect a task that already has a terminal event.
    fn ensure_session_state(inner: &mut Inner, session_id: &SessionId) -> Result<(), EventStoreError> {
        if inner.session_state.contains_key(session_id) {
            return Ok(());
        }
        let mut stmt = inner.conn.prepare(
            "SELECT DISTINCT task_id FROM events WHERE session_id = ?1 AND type IN \
             ('task.completed', 'task.failed', 'task.stopped') AND task_id IS NOT NULL",
        )?;
        let terminal_recorded = stmt
            .query_map(params![session_id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(TaskId::from)
            .collect();
        inner
            .session_state
            .insert(session_id.clone(), SessionState::new());
        inner.session_state.get_mut(session_id).unwrap().terminal_recorded = terminal_recorded;
        Ok(())
    }

    fn next_seq(conn: &Connection, session_id: &SessionId) -> Result<u64, EventStoreError> {
        let max_seq: Option<i64> = conn
            .query_row(
                "SELECT MAX(seq) FROM events WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .flatten();
        Ok(max_seq.map_or(1, |s| s as u64 + 1))
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
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

        let mut inner = self.inner.lock().await;
        Self::ensure_session_state(&mut inner, session_id)?;

        if event.kind.is_terminal() {
            if let Some(task_id) = event.trace.task_id.clone() {
                let already = inner.session_state[session_id].terminal_recorded.contains(&task_id);
                if already {
                    let existing = inner.conn.query_row(
                        "SELECT seq, time, schema_version, trace_json, runtime_json, payload_json \
                         FROM events WHERE session_id = ?1 AND task_id = ?2 AND type IN \
                         ('task.completed', 'task.failed', 'task.stopped') ORDER BY seq DESC LIMIT 1",
                        params![session_id.as_str(), task_id.as_str()],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, DateTime<Utc>>(1)?,
                                row.get::<_, u32>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )?;
                    return Self::row_to_event(
                        existing.0 as u64,
                        existing.1,
                        existing.2,
                        &existing.3,
                        &existing.4,
                        &existing.5,
                    );
                }
            }
        }

        let seq = Self::next_seq(&inner.conn, session_id)?;
        let stamped = NormalizedEvent {
            schema_version: SCHEMA_VERSION,
            seq,
            time: event.time.unwrap_or_else(Utc::now),
            trace: event.trace,
            runtime: event.runtime,
            kind: event.kind,
        };

        let trace_json = serde_json::to_string(&stamped.trace)?;
        let runtime_json = serde_json::to_string(&stamped.runtime)?;
        let payload_json = serde_json::to_string(&stamped.kind)?;
        inner.conn.execute(
            "INSERT INTO events (session_id, seq, time, schema_version, type, task_id, \
             runtime_name, trace_json, runtime_json, payload_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session_id.as_str(),
                stamped.seq as i64,
                stamped.time,
                stamped.schema_version,
                stamped.kind.type_name(),
                stamped.trace.task_id.as_ref().map(TaskId::as_str),
                stamped.runtime.name,
                trace_json,
                runtime_json,
                payload_json,
            ],
        )?;

        if stamped.kind.is_terminal() {
            if let Some(task_id) = &stamped.trace.task_id {
                inner
                    .session_state
                    .get_mut(session_id)
                    .unwrap()
                    .terminal_recorded
                    .insert(task_id.clone());
            }
        }

        let _ = inner.session_state[session_id].bus.send(stamped.clone());
        Ok(stamped)
    }

    async fn list(
        &self,
        session_id: &SessionId,
        after_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<NormalizedEvent>, EventStoreError> {
        let inner = self.inner.lock().await;
        let mut stmt = inner.conn.prepare(
            "SELECT seq, time, schema_version, trace_json, runtime_json, payload_json \
             FROM events WHERE session_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id.as_str(), after_seq as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (seq, time, schema_version, trace_json, runtime_json, payload_json) in rows {
            out.push(Self::row_to_event(
                seq as u64,
                time,
                schema_version,
                &trace_json,
                &runtime_json,
                &payload_json,
            )?);
        }
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
        let mut inner = self.inner.lock().await;
        Self::ensure_session_state(&mut inner, session_id)?;
        let live = inner.session_state[session_id].bus.subscribe();

        let mut stmt = inner.conn.prepare(
            "SELECT seq, time, schema_version, trace_json, runtime_json, payload_json \
             FROM events WHERE session_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id.as_str(), from_seq as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut historical = Vec::with_capacity(rows.len());
        for (seq, time, schema_version, trace_json, runtime_json, payload_json) in rows {
            historical.push(Self::row_to_event(
                seq as u64,
                time,
                schema_version,
                &trace_json,
                &runtime_json,
                &payload_json,
            )?);
        }
        let last_seq = historical.last().map_or(from_seq, |e| e.seq);
        Ok(EventSubscription::new(historical, last_seq, live))
    }
}
