//! Data units that flow through the sync layer.
//!
//! A [`RawRecord`] is the wire-shaped unit a rail gateway hands over; a
//! [`MirrorRecord`] is the persisted mirror row the orchestrator writes and
//! every read path returns. Rail payloads stay opaque JSON end to end.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tenant::TenantKeys;

/// One record as fetched from (or written to) the rail.
///
/// The natural `entity_id` is assigned by the rail and keys the mirror
/// upsert; the payload is the rail's field-mapped representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_id: String,
    pub payload: Value,
}

impl RawRecord {
    pub fn new(entity_id: impl Into<String>, payload: Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            payload,
        }
    }
}

/// Persisted mirror row, one per `(tenant, entity_id)`.
///
/// Created and updated only by the orchestrator's upsert path; the mirror
/// is the sole read path, so callers never see rail data that has not
/// landed here first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub tenant: TenantKeys,
    pub entity_id: String,
    pub payload: Value,
    /// Version marker reported by the rail for the fetch that produced this
    /// row (absent for optimistic write-backs).
    pub source_version: Option<String>,
    /// Epoch millis of the sync that last touched this row. Staleness is
    /// derived from the max of these per (tenant, entity type).
    pub last_synced_at: i64,
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Canonical JSON serialization: object keys sorted recursively, arrays in
/// order, compact separators. Logically identical payloads canonicalize to
/// the same string regardless of key order, which is what makes idempotency
/// keys stable across retries built by different serializers.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(*key).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
