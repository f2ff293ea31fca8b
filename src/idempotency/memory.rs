use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{IdemError, IdempotencyRecord, IdempotencyStore, PutOutcome};

/// In-memory idempotency store. The DashMap entry API provides the atomic
/// check-and-insert.
pub struct MemoryIdempotencyStore {
    data: DashMap<String, IdempotencyRecord>,
}

impl MemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn find(&self, idem_key: &str) -> Result<Option<IdempotencyRecord>, IdemError> {
        Ok(self.data.get(idem_key).map(|r| r.value().clone()))
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> Result<PutOutcome, IdemError> {
        match self.data.entry(record.idem_key.clone()) {
            Entry::Occupied(existing) => Ok(PutOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(PutOutcome::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{now_ms, RawRecord};
    use crate::tenant::TenantKeys;
    use serde_json::json;

    fn record(key: &str, amount: i64) -> IdempotencyRecord {
        IdempotencyRecord {
            idem_key: key.to_string(),
            tenant: TenantKeys::new("acme", "r1"),
            operation: "update_invoice".to_string(),
            result: RawRecord::new("inv-1", json!({"amount": amount})),
            created_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_find_missing_returns_none() {
        let store = MemoryIdempotencyStore::new();
        assert!(store.find("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_put_wins() {
        let store = MemoryIdempotencyStore::new();

        let outcome = store.put_if_absent(record("k1", 100)).await.unwrap();
        assert!(matches!(outcome, PutOutcome::Inserted));

        let outcome = store.put_if_absent(record("k1", 999)).await.unwrap();
        match outcome {
            PutOutcome::Existing(prior) => assert_eq!(prior.result.payload["amount"], 100),
            PutOutcome::Inserted => panic!("second put must not win"),
        }

        // Stored record is the first one
        let found = store.find("k1").await.unwrap().unwrap();
        assert_eq!(found.result.payload["amount"], 100);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_puts_single_winner() {
        use std::sync::Arc;

        let store = Arc::new(MemoryIdempotencyStore::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                matches!(
                    store.put_if_absent(record("k1", i)).await.unwrap(),
                    PutOutcome::Inserted
                )
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
