// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator: the decision engine of the mirror layer.
//!
//! Given a freshness hint, [`SyncOrchestrator::read_refresh`] decides
//! whether to trust the mirror or refetch from the rail, performs
//! fetch → audit log → upsert strictly in that order, and degrades to
//! stale mirror data on any failure. [`SyncOrchestrator::write_with_log`]
//! and [`SyncOrchestrator::write_idempotent`] run outbound mutations with
//! an audit trail and exactly-once upstream semantics.
//!
//! # Read state machine (per call)
//!
//! ```text
//! START ─┬─(fresh, cached_ok)──────────────────────► READING_MIRROR ─► DONE
//!        └─(strict or stale)─► FETCHING ─► LOGGING_INBOUND ─► UPSERTING ─► READING_MIRROR ─► DONE
//!                                  │              │               │
//!                                  └──────────────┴───────────────┘
//!                                                 ▼
//!                        LOGGING_FAILURE ─► FLAGGING_HYGIENE ─► READING_MIRROR (degraded) ─► DONE
//! ```
//!
//! Terminal state is always DONE; no retry loop exists within a call.
//!
//! # Thread safety
//!
//! The orchestrator is `Send + Sync` and designed for concurrent use from
//! many request handlers. Concurrent fetches for one (tenant, entity) are
//! collapsed through a keyed lease; identical idempotent writes are
//! serialized per key.

mod read;
mod types;
mod write;

pub use types::{FreshnessHint, ReadOutcome, WriteReceipt};

use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::config::MirrorSyncConfig;
use crate::idempotency::IdempotencyStore;
use crate::lease::LeaseMap;
use crate::mirror::MirrorStore;
use crate::policy::PolicyTable;

/// Pure logic layer over injected store and log adapters. Construct once
/// (normally via [`SyncRuntime`](crate::runtime::SyncRuntime)) and share
/// behind an `Arc`.
pub struct SyncOrchestrator {
    pub(super) policies: PolicyTable,
    pub(super) mirror: Arc<dyn MirrorStore>,
    pub(super) audit: Arc<dyn AuditLog>,
    pub(super) idempotency: Arc<dyn IdempotencyStore>,

    /// Fetch coalescing, keyed by (tenant, entity type)
    pub(super) fetch_leases: LeaseMap,
    /// Writer serialization, keyed by idempotency key
    pub(super) write_leases: LeaseMap,

    pub(super) fetch_timeout: Duration,
    pub(super) call_timeout: Duration,
    pub(super) lease_wait: Duration,
    pub(super) write_lease_wait: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        policies: PolicyTable,
        mirror: Arc<dyn MirrorStore>,
        audit: Arc<dyn AuditLog>,
        idempotency: Arc<dyn IdempotencyStore>,
        config: &MirrorSyncConfig,
    ) -> Self {
        Self {
            policies,
            mirror,
            audit,
            idempotency,
            fetch_leases: LeaseMap::new(),
            write_leases: LeaseMap::new(),
            fetch_timeout: config.fetch_timeout(),
            call_timeout: config.call_timeout(),
            lease_wait: config.lease_wait(),
            write_lease_wait: config.write_lease_wait(),
        }
    }

    /// The mirror adapter this orchestrator writes through. Domain
    /// services use it for plain keyed lookups that need no freshness
    /// decision.
    #[must_use]
    pub fn mirror(&self) -> &Arc<dyn MirrorStore> {
        &self.mirror
    }

    /// The audit log this orchestrator appends to.
    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }
}
