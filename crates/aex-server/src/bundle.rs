//! Support bundles: a gzip tarball of a session's events (optionally
//! scoped to one task) plus its summary, for attaching to a bug report.
//!
//! Redaction is a pure byte-to-byte transform applied while building the
//! bundle. It never touches the primary event or artifact store — a
//! redacted value that later turns out to have been needed is
//! unrecoverable, so redaction only ever happens on the copy leaving the
//! daemon.

use aex_core::{NormalizedEvent, SessionSummary};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::Write;

const REDACTED_KEYS: &[&str] = &["token", "secret", "password", "api_key", "authorization", "credential"];

/// Replaces string values under any key matching [`REDACTED_KEYS`]
/// (case-insensitively) with `"[redacted]"`, recursing through objects and
/// arrays.
fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if REDACTED_KEYS.iter().any(|needle| lower.contains(needle)) {
                        (k, Value::String("[redacted]".to_string()))
                    } else {
                        (k, redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to build support bundle: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize support bundle contents: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Builds a gzip tarball containing `session.json` and `events.json`
/// (filtered to `task_id` when given), with every event payload passed
/// through [`redact`] first.
pub fn build_support_bundle(
    summary: &SessionSummary,
    events: &[NormalizedEvent],
    task_id: Option<&str>,
) -> Result<Vec<u8>, BundleError> {
    let filtered: Vec<&NormalizedEvent> = events
        .iter()
        .filter(|e| task_id.is_none_or(|t| e.trace.task_id.as_ref().is_some_and(|tid| tid.as_str() == t)))
        .collect();

    let redacted_events: Vec<Value> = filtered
        .iter()
        .map(|e| redact(serde_json::to_value(e).expect("NormalizedEvent always serializes")))
        .collect();
    let events_json = serde_json::to_vec_pretty(&redacted_events)?;
    let session_json = serde_json::to_vec_pretty(&redact(serde_json::to_value(summary)?))?;

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        append_entry(&mut builder, "session.json", &session_json)?;
        append_entry(&mut builder, "events.json", &events_json)?;
        builder.finish()?;
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes)?;
    Ok(encoder.finish()?)
}

fn append_entry(builder: &mut tar::Builder<&mut Vec<u8>>, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes)
}
