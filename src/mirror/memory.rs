use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{validate_entity_type, MirrorFilter, MirrorStore, StoreError};
use crate::record::{MirrorRecord, RawRecord};
use crate::tenant::TenantKeys;

/// In-memory mirror store.
///
/// One map per (entity type, tenant); the inner map is mutated under the
/// DashMap shard lock, so a batch upsert is atomic with respect to readers.
pub struct MemoryMirrorStore {
    data: DashMap<(String, TenantKeys), BTreeMap<String, MirrorRecord>>,
}

impl MemoryMirrorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Total rows across all tenants and entity types
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryMirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn upsert_many(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        items: &[RawRecord],
        source_version: Option<&str>,
        synced_at_ms: i64,
    ) -> Result<usize, StoreError> {
        validate_entity_type(entity_type)?;
        if items.is_empty() {
            return Ok(0);
        }

        let mut distinct = HashSet::new();
        let key = (entity_type.to_string(), tenant.clone());
        let mut rows = self.data.entry(key).or_default();
        for item in items {
            distinct.insert(item.entity_id.clone());
            rows.insert(
                item.entity_id.clone(),
                MirrorRecord {
                    tenant: tenant.clone(),
                    entity_id: item.entity_id.clone(),
                    payload: item.payload.clone(),
                    source_version: source_version.map(str::to_string),
                    last_synced_at: synced_at_ms,
                },
            );
        }
        Ok(distinct.len())
    }

    async fn last_synced_at(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
    ) -> Result<Option<i64>, StoreError> {
        validate_entity_type(entity_type)?;
        let key = (entity_type.to_string(), tenant.clone());
        Ok(self
            .data
            .get(&key)
            .and_then(|rows| rows.values().map(|r| r.last_synced_at).max()))
    }

    async fn get_by_id(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        entity_id: &str,
    ) -> Result<Option<MirrorRecord>, StoreError> {
        validate_entity_type(entity_type)?;
        let key = (entity_type.to_string(), tenant.clone());
        Ok(self
            .data
            .get(&key)
            .and_then(|rows| rows.get(entity_id).cloned()))
    }

    async fn list(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        filter: &MirrorFilter,
    ) -> Result<Vec<MirrorRecord>, StoreError> {
        validate_entity_type(entity_type)?;
        let key = (entity_type.to_string(), tenant.clone());
        let Some(rows) = self.data.get(&key) else {
            return Ok(Vec::new());
        };
        let records = match &filter.entity_ids {
            None => rows.values().cloned().collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| rows.get(id).cloned())
                .collect(),
        };
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> TenantKeys {
        TenantKeys::new("acme", "r1")
    }

    fn raw(id: &str, amount: i64) -> RawRecord {
        RawRecord::new(id, json!({"amount": amount}))
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let store = MemoryMirrorStore::new();
        let n = store
            .upsert_many("bills", &tenant(), &[raw("b1", 10), raw("b2", 20)], Some("v1"), 1_000)
            .await
            .unwrap();
        assert_eq!(n, 2);

        let rows = store
            .list("bills", &tenant(), &MirrorFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entity_id, "b1");
        assert_eq!(rows[0].source_version.as_deref(), Some("v1"));
        assert_eq!(rows[0].last_synced_at, 1_000);
    }

    #[tokio::test]
    async fn test_duplicate_ids_last_wins() {
        let store = MemoryMirrorStore::new();
        let n = store
            .upsert_many(
                "bills",
                &tenant(),
                &[raw("b1", 10), raw("b2", 20), raw("b1", 99)],
                None,
                1_000,
            )
            .await
            .unwrap();
        assert_eq!(n, 2);

        let row = store
            .get_by_id("bills", &tenant(), "b1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.payload["amount"], 99);
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_per_tenant() {
        let store = MemoryMirrorStore::new();
        let other = TenantKeys::new("other", "r2");

        store
            .upsert_many("bills", &tenant(), &[raw("b1", 10)], None, 1_000)
            .await
            .unwrap();

        let rows = store
            .list("bills", &other, &MirrorFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_last_synced_at_takes_max() {
        let store = MemoryMirrorStore::new();
        store
            .upsert_many("bills", &tenant(), &[raw("b1", 10)], None, 1_000)
            .await
            .unwrap();
        store
            .upsert_many("bills", &tenant(), &[raw("b2", 20)], None, 5_000)
            .await
            .unwrap();

        let last = store.last_synced_at("bills", &tenant()).await.unwrap();
        assert_eq!(last, Some(5_000));
    }

    #[tokio::test]
    async fn test_last_synced_at_empty_is_none() {
        let store = MemoryMirrorStore::new();
        let last = store.last_synced_at("bills", &tenant()).await.unwrap();
        assert_eq!(last, None);
    }

    #[tokio::test]
    async fn test_list_with_id_filter() {
        let store = MemoryMirrorStore::new();
        store
            .upsert_many(
                "bills",
                &tenant(),
                &[raw("b1", 1), raw("b2", 2), raw("b3", 3)],
                None,
                1_000,
            )
            .await
            .unwrap();

        let rows = store
            .list("bills", &tenant(), &MirrorFilter::ids(["b3", "b1", "nope"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_entity_type_rejected() {
        let store = MemoryMirrorStore::new();
        let result = store
            .upsert_many("Bad Type", &tenant(), &[raw("b1", 1)], None, 1_000)
            .await;
        assert!(matches!(result, Err(StoreError::InvalidEntityType(_))));
    }

    #[tokio::test]
    async fn test_is_fresh_via_default_method() {
        use crate::policy::PolicyItem;
        use std::time::Duration;

        let store = MemoryMirrorStore::new();
        let policy = PolicyItem::new(
            "bills",
            Duration::from_secs(300),
            Duration::from_secs(3600),
        )
        .unwrap();

        // Never synced: not fresh
        assert!(!store
            .is_fresh("bills", &tenant(), &policy, 1_000_000)
            .await
            .unwrap());

        store
            .upsert_many("bills", &tenant(), &[raw("b1", 1)], None, 1_000_000)
            .await
            .unwrap();

        assert!(store
            .is_fresh("bills", &tenant(), &policy, 1_000_000 + 200_000)
            .await
            .unwrap());
        assert!(!store
            .is_fresh("bills", &tenant(), &policy, 1_000_000 + 400_000)
            .await
            .unwrap());
    }
}
