//! Rail gateway seam.
//!
//! The orchestrator never talks HTTP: rail-specific clients, field mappers,
//! and token handling live behind [`RailGateway`], injected per entity and
//! tenant. [`GuardedGateway`] decorates any gateway with a token-bucket
//! rate limiter and a circuit breaker so throttling and fail-fast stay out
//! of the orchestrator entirely.

pub mod guard;
pub mod limiter;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::record::RawRecord;

/// Read-side gateway failure. Transient by taxonomy — the read path
/// degrades to mirror data on any of these.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rail returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("rail rate limit exhausted")]
    Throttled,
    #[error("rail circuit open, fetch rejected")]
    CircuitOpen,
}

/// Write-side gateway failure. Always surfaced to the caller.
#[derive(Debug, Error)]
pub enum RemoteWriteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rail returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("remote call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("rail rate limit exhausted")]
    Throttled,
    #[error("rail circuit open, call rejected")]
    CircuitOpen,
}

impl RemoteWriteError {
    /// HTTP-shaped status for the audit trail. Failures with no remote
    /// status report as a 500-equivalent, throttling as 429.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Remote { status, .. } => *status,
            Self::Throttled => 429,
            Self::Network(_) | Self::Timeout(_) | Self::CircuitOpen => 500,
        }
    }
}

/// One tenant's connection to one rail, scoped to an entity type for
/// fetches. Owns nothing persistent.
#[async_trait]
pub trait RailGateway: Send + Sync {
    /// Rail short name (e.g. "qbo", "xero") for audit rows and metrics.
    fn rail(&self) -> &str;

    /// Pull the tenant's current records for the entity type this gateway
    /// is scoped to. Returns the records plus the rail's version marker
    /// for the snapshot.
    async fn fetch_remote(&self) -> Result<(Vec<RawRecord>, String), FetchError>;

    /// Execute a single outbound mutation and return the rail's resulting
    /// record.
    async fn call_remote(&self, operation: &str, payload: &Value)
        -> Result<RawRecord, RemoteWriteError>;
}

pub use guard::GuardedGateway;
pub use limiter::TokenBucket;
