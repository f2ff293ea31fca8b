//! # Mirror Sync
//!
//! A policy-driven, staleness-aware cache-and-audit layer for data
//! mirrored from external financial rails.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Domain Services                         │
//! │  • read_refresh(entity, tenant, hint, gateway)             │
//! │  • write_with_log / write_idempotent                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Sync Orchestrator                        │
//! │  • Freshness decision (soft/hard TTL per entity policy)    │
//! │  • Keyed leases: one fetch per (tenant, entity),           │
//! │    one writer per idempotency key                          │
//! │  • fetch → audit log → upsert, strictly in order           │
//! │  • Degrades to stale mirror data on failure                │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                    │
//!          ▼                   ▼                    ▼
//! ┌────────────────┐ ┌──────────────────┐ ┌──────────────────────┐
//! │  Rail Gateway  │ │   Mirror Store   │ │      Audit Log       │
//! │  (injected,    │ │  per-entity rows │ │  append-only entries │
//! │  rate-limited, │ │  sole read path  │ │  + hygiene flags     │
//! │  circuit-      │ │  memory / SQL    │ │  memory / SQL        │
//! │  protected)    │ │                  │ │                      │
//! └────────────────┘ └──────────────────┘ └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mirror_sync::{
//!     FreshnessHint, MirrorSyncConfig, RailGateway, SyncRuntime, TenantKeys,
//! };
//!
//! # async fn example(gateway: Arc<dyn RailGateway>) {
//! let mut runtime = SyncRuntime::new(MirrorSyncConfig::default());
//! runtime.start().await.expect("start failed");
//! let orchestrator = runtime.orchestrator().expect("runtime is ready");
//!
//! let tenant = TenantKeys::new("org-42", "realm-7");
//! let outcome = orchestrator
//!     .read_refresh("bills", &tenant, FreshnessHint::CachedOk, gateway)
//!     .await;
//!
//! for bill in outcome.records() {
//!     println!("{}: {}", bill.entity_id, bill.payload);
//! }
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Mirror is the single read path**: rail responses are never returned
//!   directly, so read-your-writes holds within a tenant.
//! - **Ordering**: the inbound audit entry is durable before the mirror is
//!   mutated; a batch upsert is all-or-nothing.
//! - **Idempotency**: at most one upstream call per
//!   (tenant, operation, canonical payload); replays return the stored
//!   result.
//! - **Degrade, don't raise**: read failures fold into a tagged
//!   [`ReadOutcome`]; write failures always surface.
//!
//! ## Modules
//!
//! - [`orchestrator`]: the [`SyncOrchestrator`] decision engine
//! - [`policy`]: per-entity soft/hard freshness windows
//! - [`mirror`]: mirror store adapters (memory, SQL)
//! - [`audit`]: append-only audit log and hygiene flags
//! - [`idempotency`]: idempotency keys and records
//! - [`gateway`]: rail gateway seam, token bucket, guarded decorator
//! - [`lease`]: keyed bounded-wait leases
//! - [`resilience`]: retry, circuit breaker
//! - [`runtime`]: composition root

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod lease;
pub mod metrics;
pub mod mirror;
pub mod orchestrator;
pub mod policy;
pub mod record;
pub mod resilience;
pub mod runtime;
pub mod tenant;

pub use audit::{AuditLog, Direction, HygieneFlag, LogEntry, LogStatus, MemoryAuditLog, SqlAuditLog};
pub use config::{MirrorSyncConfig, PolicyOverride};
pub use error::SyncError;
pub use gateway::{FetchError, GuardedGateway, RailGateway, RemoteWriteError, TokenBucket};
pub use idempotency::{
    idem_key, IdempotencyRecord, IdempotencyStore, MemoryIdempotencyStore, SqlIdempotencyStore,
};
pub use lease::{LeaseGuard, LeaseMap};
pub use mirror::{MemoryMirrorStore, MirrorFilter, MirrorStore, SqlMirrorStore, StoreError};
pub use orchestrator::{FreshnessHint, ReadOutcome, SyncOrchestrator, WriteReceipt};
pub use policy::{PolicyItem, PolicyTable};
pub use record::{MirrorRecord, RawRecord};
pub use resilience::retry::RetryConfig;
pub use resilience::{CircuitBreaker, CircuitConfig, CircuitError};
pub use runtime::{RuntimeError, RuntimeState, SyncRuntime};
pub use tenant::TenantKeys;
