use async_trait::async_trait;
use thiserror::Error;

use crate::policy::PolicyItem;
use crate::record::{MirrorRecord, RawRecord};
use crate::tenant::TenantKeys;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid entity type '{0}': expected [a-z0-9_]+")]
    InvalidEntityType(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Entity types name tables and lease keys; reject anything that is not a
/// lowercase identifier before it reaches SQL interpolation.
pub fn validate_entity_type(entity_type: &str) -> Result<(), StoreError> {
    let valid = !entity_type.is_empty()
        && entity_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidEntityType(entity_type.to_string()))
    }
}

/// Filter for mirror listings. The default selects every row the tenant
/// owns for the entity type.
#[derive(Debug, Clone, Default)]
pub struct MirrorFilter {
    /// Restrict to these entity ids (None = all)
    pub entity_ids: Option<Vec<String>>,
}

impl MirrorFilter {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_ids: Some(ids.into_iter().map(Into::into).collect()),
        }
    }
}

/// Per-entity mirror adapter.
///
/// Implementations are logically partitioned by tenant; the orchestrator is
/// the only writer. Rows are returned ordered by entity id so listings are
/// deterministic across backends.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    /// Transactional batch upsert keyed by natural entity id: all rows from
    /// one fetch become visible together or not at all. Duplicate ids
    /// within the batch collapse, the last item winning. Returns the
    /// distinct row count written.
    async fn upsert_many(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        items: &[RawRecord],
        source_version: Option<&str>,
        synced_at_ms: i64,
    ) -> Result<usize, StoreError>;

    /// Newest `last_synced_at` across the tenant's rows for this entity
    /// type; None when the tenant has never synced it.
    async fn last_synced_at(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
    ) -> Result<Option<i64>, StoreError>;

    async fn get_by_id(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        entity_id: &str,
    ) -> Result<Option<MirrorRecord>, StoreError>;

    async fn list(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        filter: &MirrorFilter,
    ) -> Result<Vec<MirrorRecord>, StoreError>;

    /// Freshness per the given policy, derived from
    /// [`last_synced_at`](Self::last_synced_at).
    async fn is_fresh(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        policy: &PolicyItem,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let last = self.last_synced_at(entity_type, tenant).await?;
        Ok(policy.is_fresh(last, now_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entity_type() {
        assert!(validate_entity_type("bills").is_ok());
        assert!(validate_entity_type("payroll_runs2").is_ok());

        assert!(validate_entity_type("").is_err());
        assert!(validate_entity_type("Bills").is_err());
        assert!(validate_entity_type("bills; DROP TABLE x").is_err());
        assert!(validate_entity_type("bills-v2").is_err());
    }

    #[test]
    fn test_filter_ids_helper() {
        let filter = MirrorFilter::ids(["a", "b"]);
        assert_eq!(
            filter.entity_ids,
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(MirrorFilter::default().entity_ids.is_none());
    }
}
