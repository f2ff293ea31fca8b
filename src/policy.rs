// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-entity freshness policy.
//!
//! A [`PolicyItem`] carries two windows: the soft TTL, inside which mirror
//! data is trusted without a refetch, and the hard TTL, past which mirror
//! data must not be relied upon even as a degraded fallback. Policies are
//! resolved tenant override → global table → documented default, and are
//! immutable for the process lifetime.

use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use crate::config::MirrorSyncConfig;
use crate::tenant::TenantKeys;

/// Soft TTL used when no policy is configured for an entity type.
pub const DEFAULT_SOFT_TTL: Duration = Duration::from_secs(300);
/// Hard TTL used when no policy is configured for an entity type.
pub const DEFAULT_HARD_TTL: Duration = Duration::from_secs(3600);

/// Freshness windows for one entity type. Invariant: `hard_ttl >= soft_ttl`
/// (enforced at construction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyItem {
    pub entity_type: String,
    pub soft_ttl: Duration,
    pub hard_ttl: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy for '{entity_type}': hard_ttl {hard_ttl:?} is below soft_ttl {soft_ttl:?}")]
    HardBelowSoft {
        entity_type: String,
        soft_ttl: Duration,
        hard_ttl: Duration,
    },
}

impl PolicyItem {
    pub fn new(
        entity_type: impl Into<String>,
        soft_ttl: Duration,
        hard_ttl: Duration,
    ) -> Result<Self, PolicyError> {
        let entity_type = entity_type.into();
        if hard_ttl < soft_ttl {
            return Err(PolicyError::HardBelowSoft {
                entity_type,
                soft_ttl,
                hard_ttl,
            });
        }
        Ok(Self {
            entity_type,
            soft_ttl,
            hard_ttl,
        })
    }

    /// Mirror data synced at `cached_at_ms` may be trusted at `now_ms`
    /// without a refetch. A mirror that has never synced is never fresh.
    #[must_use]
    pub fn is_fresh(&self, cached_at_ms: Option<i64>, now_ms: i64) -> bool {
        match cached_at_ms {
            None => false,
            Some(cached_at) => {
                now_ms.saturating_sub(cached_at) <= self.soft_ttl.as_millis() as i64
            }
        }
    }

    /// Mirror data synced at `cached_at_ms` has crossed the hard ceiling at
    /// `now_ms`. An empty mirror has nothing to rely on, so it is reported
    /// not-stale (the fetch decision comes from [`is_fresh`](Self::is_fresh)).
    #[must_use]
    pub fn is_stale(&self, cached_at_ms: Option<i64>, now_ms: i64) -> bool {
        match cached_at_ms {
            None => false,
            Some(cached_at) => {
                now_ms.saturating_sub(cached_at) > self.hard_ttl.as_millis() as i64
            }
        }
    }
}

/// Resolved policy table, built once at startup from config.
///
/// Lookup order: tenant override, global table, then the documented default
/// windows with a recorded warning — a missing policy is never an error.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default_soft: Duration,
    default_hard: Duration,
    global: HashMap<String, PolicyItem>,
    tenant: HashMap<String, HashMap<String, PolicyItem>>,
}

impl PolicyTable {
    /// Build and validate the table. Every configured window (including the
    /// defaults) must satisfy `hard_ttl >= soft_ttl`.
    pub fn from_config(config: &MirrorSyncConfig) -> Result<Self, PolicyError> {
        let default_soft = Duration::from_secs(config.default_soft_ttl_secs);
        let default_hard = Duration::from_secs(config.default_hard_ttl_secs);
        if default_hard < default_soft {
            return Err(PolicyError::HardBelowSoft {
                entity_type: "(default)".into(),
                soft_ttl: default_soft,
                hard_ttl: default_hard,
            });
        }

        let mut global = HashMap::new();
        for (entity_type, windows) in &config.policies {
            let item = PolicyItem::new(
                entity_type.clone(),
                Duration::from_secs(windows.soft_ttl_secs),
                Duration::from_secs(windows.hard_ttl_secs),
            )?;
            global.insert(entity_type.clone(), item);
        }

        let mut tenant = HashMap::new();
        for (tenant_key, overrides) in &config.tenant_policies {
            let mut table = HashMap::new();
            for (entity_type, windows) in overrides {
                let item = PolicyItem::new(
                    entity_type.clone(),
                    Duration::from_secs(windows.soft_ttl_secs),
                    Duration::from_secs(windows.hard_ttl_secs),
                )?;
                table.insert(entity_type.clone(), item);
            }
            tenant.insert(tenant_key.clone(), table);
        }

        Ok(Self {
            default_soft,
            default_hard,
            global,
            tenant,
        })
    }

    /// Resolve the policy for an entity type, optionally tenant-scoped.
    #[must_use]
    pub fn get(&self, tenant: Option<&TenantKeys>, entity_type: &str) -> PolicyItem {
        if let Some(tenant) = tenant {
            if let Some(item) = self
                .tenant
                .get(&tenant.to_string())
                .and_then(|table| table.get(entity_type))
            {
                return item.clone();
            }
        }

        if let Some(item) = self.global.get(entity_type) {
            return item.clone();
        }

        warn!(
            entity_type = %entity_type,
            soft_ttl_secs = self.default_soft.as_secs(),
            hard_ttl_secs = self.default_hard.as_secs(),
            "No freshness policy configured, using defaults"
        );
        PolicyItem {
            entity_type: entity_type.to_string(),
            soft_ttl: self.default_soft,
            hard_ttl: self.default_hard,
        }
    }
}
