//! Top-level error taxonomy.
//!
//! Only the write paths surface these: read-path failures are absorbed
//! into [`ReadOutcome`](crate::orchestrator::ReadOutcome) variants and
//! never reach the caller as errors.

use thiserror::Error;

use crate::audit::AuditError;
use crate::gateway::RemoteWriteError;
use crate::idempotency::IdemError;
use crate::mirror::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The rail rejected or never received the write; the caller must
    /// retry explicitly.
    #[error("remote write failed: {0}")]
    RemoteWrite(#[from] RemoteWriteError),

    /// Dedup state could not be determined or persisted — proceeding
    /// could duplicate a remote call.
    #[error("idempotency store: {0}")]
    Idempotency(#[from] IdemError),

    /// The per-key writer lease could not be acquired in bounded time.
    #[error("writer lease for '{key}' not acquired within {waited_ms}ms")]
    LeaseTimeout { key: String, waited_ms: u64 },

    #[error("audit log: {0}")]
    Audit(#[from] AuditError),

    #[error("mirror store: {0}")]
    Store(#[from] StoreError),

    /// A background task died before reporting (panic or runtime teardown)
    #[error("background task failed: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = SyncError::LeaseTimeout {
            key: "abc".into(),
            waited_ms: 10_000,
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("10000"));

        let err: SyncError = RemoteWriteError::Network("reset".into()).into();
        assert!(matches!(err, SyncError::RemoteWrite(_)));
    }
}
