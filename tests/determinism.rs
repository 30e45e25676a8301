//! Canonical-JSON and content-hash determinism guarantees that every
//! component above `aex-core` relies on: two equivalent events, built in
//! different field orders, must canonicalize and hash identically.

use aex_core::{
    canonical_json, hash_canonical, EventKind, NormalizedEvent, RuntimeInfo, SessionId, TaskId,
    TraceInfo, SCHEMA_VERSION,
};
use chrono::{DateTime, Utc};

fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn sample_event() -> NormalizedEvent {
    NormalizedEvent {
        schema_version: SCHEMA_VERSION,
        seq: 1,
        time: fixed_timestamp(),
        trace: TraceInfo::for_task(SessionId::from("s1"), TaskId::from("t1")),
        runtime: RuntimeInfo {
            name: "mock".to_string(),
            model: Some("mock-1".to_string()),
            runtime_session_id: None,
        },
        kind: EventKind::TaskCompleted {},
    }
}

#[test]
fn canonical_json_is_stable_across_runs() {
    let a = canonical_json(&sample_event()).unwrap();
    let b = canonical_json(&sample_event()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn hash_is_insensitive_to_key_order_in_raw_json() {
    // The same event, hand-written with its top-level keys reversed, must
    // still hash identically: canonicalization sorts keys, not preserves them.
    let ordered = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "seq": 1,
        "time": "2025-01-01T00:00:00Z",
        "trace": {"session_id": "s1", "task_id": "t1"},
        "runtime": {"name": "mock", "model": "mock-1"},
        "type": "task.completed",
    });
    let reversed = serde_json::json!({
        "type": "task.completed",
        "runtime": {"model": "mock-1", "name": "mock"},
        "trace": {"task_id": "t1", "session_id": "s1"},
        "time": "2025-01-01T00:00:00Z",
        "seq": 1,
        "schema_version": SCHEMA_VERSION,
    });
    assert_eq!(hash_canonical(&ordered).unwrap(), hash_canonical(&reversed).unwrap());
}

#[test]
fn different_sequence_numbers_hash_differently() {
    let mut other = sample_event();
    other.seq = 2;
    assert_ne!(hash_canonical(&sample_event()).unwrap(), hash_canonical(&other).unwrap());
}

#[test]
fn event_round_trips_through_json() {
    let event = sample_event();
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"type\":\"task.completed\""));
    let back: NormalizedEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back.seq, event.seq);
    assert!(matches!(back.kind, EventKind::TaskCompleted {}));
}
