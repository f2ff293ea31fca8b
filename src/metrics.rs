// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for mirror-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding daemon is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mirror_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `entity`: entity type (bills, invoices, ...)
//! - `rail`: rail short name
//! - `outcome` / `status`: result classification

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one read_refresh call by outcome (fresh, refreshed, contended,
/// degraded, unavailable)
pub fn record_read(entity: &str, outcome: &str) {
    counter!(
        "mirror_sync_reads_total",
        "entity" => entity.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record read_refresh latency
pub fn record_read_latency(entity: &str, duration: Duration) {
    histogram!(
        "mirror_sync_read_seconds",
        "entity" => entity.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one upstream fetch attempt
pub fn record_fetch(rail: &str, entity: &str, status: &str) {
    counter!(
        "mirror_sync_fetches_total",
        "rail" => rail.to_string(),
        "entity" => entity.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record upstream fetch latency
pub fn record_fetch_latency(rail: &str, duration: Duration) {
    histogram!(
        "mirror_sync_fetch_seconds",
        "rail" => rail.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows written by a mirror batch upsert
pub fn record_upsert_rows(entity: &str, rows: usize) {
    counter!(
        "mirror_sync_upserted_rows_total",
        "entity" => entity.to_string()
    )
    .increment(rows as u64);
}

/// Record one outbound write attempt
pub fn record_write(operation: &str, status: &str) {
    counter!(
        "mirror_sync_writes_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a write answered from the idempotency store
pub fn record_idempotent_replay(operation: &str) {
    counter!(
        "mirror_sync_idempotent_replays_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a hygiene flag being raised
pub fn record_hygiene_flag(code: &str) {
    counter!(
        "mirror_sync_hygiene_flags_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record a read giving up on a held fetch lease
pub fn record_lease_contention(entity: &str) {
    counter!(
        "mirror_sync_lease_contention_total",
        "entity" => entity.to_string()
    )
    .increment(1);
}

/// Record a call rejected by the rail token bucket
pub fn record_throttle(rail: &str) {
    counter!(
        "mirror_sync_throttled_total",
        "rail" => rail.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call result (success, failure, rejected)
pub fn record_circuit_breaker_call(circuit: &str, result: &str) {
    counter!(
        "mirror_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}
