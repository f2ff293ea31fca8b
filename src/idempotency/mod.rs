//! Idempotency records for outbound writes.
//!
//! The key is a deterministic hash over `(tenant, operation, payload)` in
//! canonical form, so a retried request — possibly serialized by a
//! different client with different key order — maps to the same record. A
//! given key maps to at most one successful remote call; replays return
//! the stored result without touching the rail.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::record::{canonical_json, RawRecord};
use crate::tenant::TenantKeys;

/// Deterministic idempotency key: hex sha256 over tenant, operation, and
/// the canonicalized payload.
#[must_use]
pub fn idem_key(tenant: &TenantKeys, operation: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant.org_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(tenant.realm_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(operation.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Stored outcome of one successful remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idem_key: String,
    pub tenant: TenantKeys,
    pub operation: String,
    /// The rail's response, replayed verbatim on duplicate submissions
    pub result: RawRecord,
    pub created_at: i64,
}

/// Result of an atomic check-and-insert.
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// This caller's record was stored; it owns the key.
    Inserted,
    /// Another record already holds the key; the stored one is returned.
    Existing(IdempotencyRecord),
}

#[derive(Error, Debug)]
pub enum IdemError {
    #[error("idempotency backend error: {0}")]
    Backend(String),
    #[error("idempotency record for '{0}' is corrupt: {1}")]
    Corrupt(String, String),
}

/// Idempotency record store. `put_if_absent` must be atomic — two
/// concurrent identical writes must not both observe `Inserted`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find(&self, idem_key: &str) -> Result<Option<IdempotencyRecord>, IdemError>;

    async fn put_if_absent(&self, record: IdempotencyRecord) -> Result<PutOutcome, IdemError>;
}

pub use memory::MemoryIdempotencyStore;
pub use sql::SqlIdempotencyStore;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> TenantKeys {
        TenantKeys::new("acme", "r1")
    }

    #[test]
    fn test_key_is_stable() {
        let payload = json!({"invoice_id": "inv-1", "amount": 100});
        let k1 = idem_key(&tenant(), "update_invoice", &payload);
        let k2 = idem_key(&tenant(), "update_invoice", &payload);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64); // hex sha256
    }

    #[test]
    fn test_key_ignores_json_key_order() {
        let a = json!({"amount": 100, "invoice_id": "inv-1"});
        let b = json!({"invoice_id": "inv-1", "amount": 100});
        assert_eq!(
            idem_key(&tenant(), "update_invoice", &a),
            idem_key(&tenant(), "update_invoice", &b)
        );
    }

    #[test]
    fn test_key_varies_by_tenant_operation_payload() {
        let payload = json!({"amount": 100});
        let base = idem_key(&tenant(), "update_invoice", &payload);

        assert_ne!(
            base,
            idem_key(&TenantKeys::new("other", "r1"), "update_invoice", &payload)
        );
        assert_ne!(base, idem_key(&tenant(), "void_invoice", &payload));
        assert_ne!(
            base,
            idem_key(&tenant(), "update_invoice", &json!({"amount": 101}))
        );
    }

    #[test]
    fn test_key_separator_prevents_field_bleed() {
        // ("ab", "c") must not collide with ("a", "bc")
        let k1 = idem_key(&TenantKeys::new("ab", "c"), "op", &json!({}));
        let k2 = idem_key(&TenantKeys::new("a", "bc"), "op", &json!({}));
        assert_ne!(k1, k2);
    }
}
