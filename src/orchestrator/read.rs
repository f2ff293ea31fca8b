// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read path: policy decision, fetch coalescing, degrade ladder.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;
use tracing::{debug, warn};

use super::types::{FreshnessHint, ReadOutcome};
use super::SyncOrchestrator;
use crate::audit::{AuditLog, LogEntry};
use crate::gateway::{FetchError, RailGateway};
use crate::lease::LeaseGuard;
use crate::mirror::{MirrorFilter, MirrorStore};
use crate::record::now_ms;
use crate::tenant::TenantKeys;

impl SyncOrchestrator {
    /// Read the mirror for one (tenant, entity type), refetching from the
    /// rail first when the hint demands it or the soft TTL has lapsed.
    ///
    /// Never returns an error: every failure mode degrades into a
    /// [`ReadOutcome`] variant. The mirror is the single read path — even
    /// a call that just fetched reads its result back from the mirror, so
    /// read-your-writes holds for every caller.
    #[tracing::instrument(
        skip(self, gateway),
        fields(entity = %entity_type, tenant = %tenant, hint = %hint, rail = gateway.rail(), outcome)
    )]
    pub async fn read_refresh(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        hint: FreshnessHint,
        gateway: Arc<dyn RailGateway>,
    ) -> ReadOutcome {
        let start = Instant::now();
        let policy = self.policies.get(Some(tenant), entity_type);

        let last_synced = match self.mirror.last_synced_at(entity_type, tenant).await {
            Ok(last) => last,
            Err(e) => {
                // Freshness unknown: treat as never-synced and fetch
                warn!(error = %e, "Freshness probe failed, forcing fetch");
                None
            }
        };

        let should_fetch =
            hint == FreshnessHint::Strict || !policy.is_fresh(last_synced, now_ms());

        if !should_fetch {
            debug!("Mirror fresh, serving without fetch");
            let outcome = match self.read_mirror(entity_type, tenant).await {
                Ok(records) => ReadOutcome::Fresh(records),
                Err(e) => ReadOutcome::Unavailable {
                    error: e.to_string(),
                },
            };
            return self.finish(entity_type, start, outcome);
        }

        // One fetch per (tenant, entity) at a time. A caller that cannot
        // get the lease in bounded time serves the mirror as-is rather
        // than blocking indefinitely.
        let lease_key = format!("{tenant}/{entity_type}");
        let Some(lease) = self.fetch_leases.acquire(&lease_key, self.lease_wait).await else {
            warn!("Fetch lease held elsewhere past the bounded wait, serving mirror as-is");
            crate::metrics::record_lease_contention(entity_type);
            let outcome = match self.read_mirror(entity_type, tenant).await {
                Ok(records) => ReadOutcome::Contended(records),
                Err(e) => ReadOutcome::Unavailable {
                    error: e.to_string(),
                },
            };
            return self.finish(entity_type, start, outcome);
        };

        // The lease may have been held by a fetch that just refreshed this
        // key; a CachedOk caller takes that result instead of refetching.
        // Strict callers always run their own fetch.
        if hint == FreshnessHint::CachedOk {
            if let Ok(true) = self
                .mirror
                .is_fresh(entity_type, tenant, &policy, now_ms())
                .await
            {
                drop(lease);
                debug!("Mirror refreshed while waiting for lease, fetch coalesced");
                let outcome = match self.read_mirror(entity_type, tenant).await {
                    Ok(records) => ReadOutcome::Fresh(records),
                    Err(e) => ReadOutcome::Unavailable {
                        error: e.to_string(),
                    },
                };
                return self.finish(entity_type, start, outcome);
            }
        }

        // The fetch, its audit entry, and the upsert run on a spawned task
        // holding the lease, so a cancelled caller cannot tear down a
        // completed upstream call before it is persisted.
        let refreshed = tokio::spawn(refresh_once(
            Arc::clone(&self.mirror),
            Arc::clone(&self.audit),
            gateway,
            entity_type.to_string(),
            tenant.clone(),
            self.fetch_timeout,
            lease,
        ))
        .await;

        let outcome = match refreshed {
            Ok(Ok(source_version)) => match self.read_mirror(entity_type, tenant).await {
                Ok(records) => ReadOutcome::Refreshed {
                    records,
                    source_version,
                },
                Err(e) => ReadOutcome::Unavailable {
                    error: e.to_string(),
                },
            },
            Ok(Err(error)) => self.degrade(entity_type, tenant, last_synced, error).await,
            Err(join_err) => {
                // The task died before it could log its own failure
                let error = format!("refresh task failed: {join_err}");
                warn!(error = %error, "Fetch task did not complete");
                note_failure(&self.audit, "unknown", entity_type, tenant, &error).await;
                self.degrade(entity_type, tenant, last_synced, error).await
            }
        };
        self.finish(entity_type, start, outcome)
    }

    async fn read_mirror(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
    ) -> Result<Vec<crate::record::MirrorRecord>, crate::mirror::StoreError> {
        self.mirror
            .list(entity_type, tenant, &MirrorFilter::default())
            .await
    }

    /// Failure tail of the read ladder: serve last-known rows, marking
    /// them hard-expired (and hygiene-flagging) when even the degraded
    /// fallback window has lapsed.
    async fn degrade(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        last_synced: Option<i64>,
        error: String,
    ) -> ReadOutcome {
        let policy = self.policies.get(Some(tenant), entity_type);
        let hard_expired = policy.is_stale(last_synced, now_ms());
        if hard_expired {
            let code = format!("stale_data_{entity_type}");
            if let Err(e) = self.audit.flag_hygiene(tenant, &code).await {
                warn!(error = %e, code = %code, "Failed to raise staleness hygiene flag");
            }
            crate::metrics::record_hygiene_flag(&code);
        }

        match self.read_mirror(entity_type, tenant).await {
            Ok(records) => ReadOutcome::Degraded {
                records,
                hard_expired,
                error,
            },
            Err(e) => ReadOutcome::Unavailable {
                error: format!("{error}; mirror read also failed: {e}"),
            },
        }
    }

    fn finish(&self, entity_type: &str, start: Instant, outcome: ReadOutcome) -> ReadOutcome {
        tracing::Span::current().record("outcome", outcome.label());
        crate::metrics::record_read(entity_type, outcome.label());
        crate::metrics::record_read_latency(entity_type, start.elapsed());
        outcome
    }
}

/// One fetch → log → upsert pass. Runs detached from the caller; the held
/// lease travels with it and releases only after the mirror is written
/// (or the failure is logged).
async fn refresh_once(
    mirror: Arc<dyn MirrorStore>,
    audit: Arc<dyn AuditLog>,
    gateway: Arc<dyn RailGateway>,
    entity_type: String,
    tenant: TenantKeys,
    fetch_timeout: std::time::Duration,
    lease: LeaseGuard,
) -> Result<String, String> {
    let _lease = lease;
    let rail = gateway.rail().to_string();

    let fetch_start = Instant::now();
    let fetched = match timeout(fetch_timeout, gateway.fetch_remote()).await {
        Ok(Ok(fetched)) => fetched,
        Ok(Err(e)) => {
            crate::metrics::record_fetch(&rail, &entity_type, "error");
            let error = e.to_string();
            note_failure(&audit, &rail, &entity_type, &tenant, &error).await;
            return Err(error);
        }
        Err(_) => {
            crate::metrics::record_fetch(&rail, &entity_type, "timeout");
            let error = FetchError::Timeout(fetch_timeout).to_string();
            note_failure(&audit, &rail, &entity_type, &tenant, &error).await;
            return Err(error);
        }
    };
    crate::metrics::record_fetch(&rail, &entity_type, "ok");
    crate::metrics::record_fetch_latency(&rail, fetch_start.elapsed());

    let (items, source_version) = fetched;
    debug!(
        count = items.len(),
        source_version = %source_version,
        "Fetched from rail"
    );

    // The inbound entry must be durable before the mirror changes, so the
    // audit trail reflects this fetch even if the upsert fails.
    let snapshot = serde_json::to_value(&items).unwrap_or(serde_json::Value::Null);
    let entry = LogEntry::inbound_ok(&rail, &entity_type, &tenant, &source_version, snapshot);
    if let Err(e) = audit.append(entry).await {
        let error = format!("inbound audit append failed: {e}");
        note_failure(&audit, &rail, &entity_type, &tenant, &error).await;
        return Err(error);
    }

    match mirror
        .upsert_many(&entity_type, &tenant, &items, Some(&source_version), now_ms())
        .await
    {
        Ok(rows) => {
            crate::metrics::record_upsert_rows(&entity_type, rows);
            Ok(source_version)
        }
        Err(e) => {
            let error = format!("mirror upsert failed: {e}");
            note_failure(&audit, &rail, &entity_type, &tenant, &error).await;
            Err(error)
        }
    }
}

/// Failure bookkeeping: one Failed inbound entry plus one
/// `sync_error_{entity}` hygiene flag.
async fn note_failure(
    audit: &Arc<dyn AuditLog>,
    rail: &str,
    entity_type: &str,
    tenant: &TenantKeys,
    error: &str,
) {
    let entry = LogEntry::inbound_failed(rail, entity_type, tenant, error);
    if let Err(e) = audit.append(entry).await {
        warn!(error = %e, "Failed to append inbound failure entry");
    }

    let code = format!("sync_error_{entity_type}");
    if let Err(e) = audit.flag_hygiene(tenant, &code).await {
        warn!(error = %e, code = %code, "Failed to raise hygiene flag");
    }
    crate::metrics::record_hygiene_flag(&code);
}
