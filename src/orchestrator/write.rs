// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write path: audited and idempotent outbound mutations.
//!
//! Unlike reads, write failures are never degraded away — a caller whose
//! write did not land must find out. The idempotent variant guarantees at
//! most one upstream call per (tenant, operation, payload).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::types::WriteReceipt;
use super::SyncOrchestrator;
use crate::audit::{AuditLog, LogEntry};
use crate::error::SyncError;
use crate::gateway::{RailGateway, RemoteWriteError};
use crate::idempotency::{idem_key, IdempotencyRecord, IdempotencyStore, PutOutcome};
use crate::lease::LeaseGuard;
use crate::mirror::MirrorStore;
use crate::record::{now_ms, RawRecord};
use crate::tenant::TenantKeys;

impl SyncOrchestrator {
    /// Execute one outbound mutation with an audit trail.
    ///
    /// Success appends an Out/Ok entry; failure appends an Out/Failed
    /// entry with an HTTP-shaped status code and returns the error.
    #[tracing::instrument(
        skip(self, payload, gateway),
        fields(operation = %operation, tenant = %tenant, rail = gateway.rail())
    )]
    pub async fn write_with_log(
        &self,
        operation: &str,
        tenant: &TenantKeys,
        payload: Value,
        gateway: Arc<dyn RailGateway>,
    ) -> Result<RawRecord, SyncError> {
        // Detached so a cancelled caller cannot abandon a call the rail
        // may already have applied before the audit entry lands.
        let handle = tokio::spawn(call_and_log(
            Arc::clone(&self.audit),
            gateway,
            operation.to_string(),
            None,
            tenant.clone(),
            payload,
            None,
            self.call_timeout,
        ));

        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                return Err(SyncError::Internal(format!(
                    "write task failed: {join_err}"
                )))
            }
        };

        match result {
            Ok(record) => {
                crate::metrics::record_write(operation, "ok");
                Ok(record)
            }
            Err(e) => {
                crate::metrics::record_write(operation, "error");
                Err(SyncError::RemoteWrite(e))
            }
        }
    }

    /// Execute one outbound mutation at most once per
    /// (tenant, operation, payload).
    ///
    /// A duplicate submission — same canonical payload, any key order —
    /// returns the stored result with `replayed = true` and never touches
    /// the rail. On success the result is optimistically applied to the
    /// mirror; an apply failure raises a hygiene flag but does not fail
    /// the write.
    #[tracing::instrument(
        skip(self, payload, gateway),
        fields(entity = %entity_type, operation = %operation, tenant = %tenant, rail = gateway.rail(), replayed)
    )]
    pub async fn write_idempotent(
        &self,
        entity_type: &str,
        operation: &str,
        tenant: &TenantKeys,
        payload: Value,
        gateway: Arc<dyn RailGateway>,
    ) -> Result<WriteReceipt, SyncError> {
        let key = idem_key(tenant, operation, &payload);

        // Fast path: already executed
        if let Some(existing) = self.idempotency.find(&key).await? {
            debug!(idem_key = %key, "Replaying stored result");
            tracing::Span::current().record("replayed", true);
            crate::metrics::record_idempotent_replay(operation);
            return Ok(WriteReceipt {
                record: existing.result,
                idem_key: key,
                replayed: true,
            });
        }

        // Single writer per key. Not being able to tell whether a
        // concurrent identical write is in flight makes proceeding unsafe.
        let Some(lease) = self.write_leases.acquire(&key, self.write_lease_wait).await else {
            crate::metrics::record_lease_contention(operation);
            return Err(SyncError::LeaseTimeout {
                key,
                waited_ms: self.write_lease_wait.as_millis() as u64,
            });
        };

        // Re-check under the lease: the previous holder may have been the
        // identical request.
        if let Some(existing) = self.idempotency.find(&key).await? {
            drop(lease);
            debug!(idem_key = %key, "Replaying result stored by concurrent writer");
            tracing::Span::current().record("replayed", true);
            crate::metrics::record_idempotent_replay(operation);
            return Ok(WriteReceipt {
                record: existing.result,
                idem_key: key,
                replayed: true,
            });
        }

        tracing::Span::current().record("replayed", false);

        let handle = tokio::spawn(execute_idempotent(
            Arc::clone(&self.mirror),
            Arc::clone(&self.audit),
            Arc::clone(&self.idempotency),
            gateway,
            entity_type.to_string(),
            operation.to_string(),
            tenant.clone(),
            payload,
            key,
            self.call_timeout,
            lease,
        ));

        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                return Err(SyncError::Internal(format!(
                    "write task failed: {join_err}"
                )))
            }
        };

        match &result {
            Ok(receipt) if receipt.replayed => {
                crate::metrics::record_idempotent_replay(operation)
            }
            Ok(_) => crate::metrics::record_write(operation, "ok"),
            Err(_) => crate::metrics::record_write(operation, "error"),
        }
        result
    }
}

/// Remote call plus its audit entry; shared by both write paths.
#[allow(clippy::too_many_arguments)]
async fn call_and_log(
    audit: Arc<dyn AuditLog>,
    gateway: Arc<dyn RailGateway>,
    operation: String,
    entity_type: Option<String>,
    tenant: TenantKeys,
    payload: Value,
    key: Option<String>,
    call_timeout: Duration,
) -> Result<RawRecord, RemoteWriteError> {
    let rail = gateway.rail().to_string();

    let result = match timeout(call_timeout, gateway.call_remote(&operation, &payload)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteWriteError::Timeout(call_timeout)),
    };

    match result {
        Ok(record) => {
            let entry = LogEntry::outbound_ok(
                &rail,
                &operation,
                entity_type.as_deref(),
                &tenant,
                key.as_deref(),
                payload,
            );
            if let Err(e) = audit.append(entry).await {
                // The rail applied the write; failing the caller now would
                // invite a duplicate. Flag it and move on.
                warn!(error = %e, "Failed to append outbound success entry");
                if let Err(flag_err) = audit.flag_hygiene(&tenant, "audit_error").await {
                    warn!(error = %flag_err, "Failed to raise audit_error hygiene flag");
                }
                crate::metrics::record_hygiene_flag("audit_error");
            }
            Ok(record)
        }
        Err(err) => {
            let entry = LogEntry::outbound_failed(
                &rail,
                &operation,
                entity_type.as_deref(),
                &tenant,
                key.as_deref(),
                err.status_code(),
                &err.to_string(),
                payload,
            );
            if let Err(e) = audit.append(entry).await {
                warn!(error = %e, "Failed to append outbound failure entry");
            }
            Err(err)
        }
    }
}

/// Remote call → idempotency record → optimistic apply → audit entry,
/// detached from the caller with the writer lease held throughout.
#[allow(clippy::too_many_arguments)]
async fn execute_idempotent(
    mirror: Arc<dyn MirrorStore>,
    audit: Arc<dyn AuditLog>,
    idempotency: Arc<dyn IdempotencyStore>,
    gateway: Arc<dyn RailGateway>,
    entity_type: String,
    operation: String,
    tenant: TenantKeys,
    payload: Value,
    key: String,
    call_timeout: Duration,
    lease: LeaseGuard,
) -> Result<WriteReceipt, SyncError> {
    let _lease = lease;
    let rail = gateway.rail().to_string();

    let record = call_and_log(
        Arc::clone(&audit),
        gateway,
        operation.clone(),
        Some(entity_type.clone()),
        tenant.clone(),
        payload.clone(),
        Some(key.clone()),
        call_timeout,
    )
    .await?;

    // Dedup state must be durable before the result is surfaced
    let idem_record = IdempotencyRecord {
        idem_key: key.clone(),
        tenant: tenant.clone(),
        operation: operation.clone(),
        result: record.clone(),
        created_at: now_ms(),
    };
    match idempotency.put_if_absent(idem_record).await {
        Ok(PutOutcome::Inserted) => {}
        Ok(PutOutcome::Existing(prior)) => {
            // Should not happen under the lease; keep the first winner so
            // the at-most-one invariant holds for future replays.
            warn!(idem_key = %key, "Idempotency race despite writer lease");
            let code = format!("idem_race_{operation}");
            if let Err(e) = audit.flag_hygiene(&tenant, &code).await {
                warn!(error = %e, "Failed to raise idem_race hygiene flag");
            }
            crate::metrics::record_hygiene_flag(&code);
            return Ok(WriteReceipt {
                record: prior.result,
                idem_key: key,
                replayed: true,
            });
        }
        Err(e) => {
            // The rail applied the write but dedup state is unknown — a
            // retry could duplicate it. Surface after leaving a trail.
            let entry = LogEntry::outbound_flagged(
                &rail,
                &operation,
                Some(&entity_type),
                &tenant,
                Some(&key),
                &format!("idempotency record not persisted: {e}"),
                payload,
            );
            if let Err(log_err) = audit.append(entry).await {
                warn!(error = %log_err, "Failed to append flagged outbound entry");
            }
            if let Err(flag_err) = audit.flag_hygiene(&tenant, "idem_record_error").await {
                warn!(error = %flag_err, "Failed to raise idem_record_error hygiene flag");
            }
            crate::metrics::record_hygiene_flag("idem_record_error");
            return Err(SyncError::Idempotency(e));
        }
    }

    // Optimistic apply: best effort, anomalies flag but never fail the
    // write (the rail already accepted it)
    if let Err(e) = mirror
        .upsert_many(
            &entity_type,
            &tenant,
            std::slice::from_ref(&record),
            None,
            now_ms(),
        )
        .await
    {
        warn!(error = %e, "Optimistic mirror apply failed");
        let code = format!("apply_error_{entity_type}");
        if let Err(flag_err) = audit.flag_hygiene(&tenant, &code).await {
            warn!(error = %flag_err, "Failed to raise apply_error hygiene flag");
        }
        crate::metrics::record_hygiene_flag(&code);
    }

    Ok(WriteReceipt {
        record,
        idem_key: key,
        replayed: false,
    })
}
