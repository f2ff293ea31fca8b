// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL mirror store.
//!
//! One table per entity type (`mirror_{entity_type}`), keyed by
//! `(org_id, realm_id, entity_id)`, with `source_version` and
//! `last_synced_at` columns. Tables are created lazily the first time an
//! entity type is touched; entity type names are validated identifiers
//! before interpolation.
//!
//! Payloads are stored as TEXT — the sqlx `Any` driver does not map native
//! JSON types, and JSON functions still work on TEXT columns in MySQL.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver treats LONGTEXT/TEXT as BLOB on MySQL, so text columns
//! are read as String first, then as `Vec<u8>` with a UTF-8 conversion.

use std::collections::{BTreeMap, HashSet};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use tokio::sync::Mutex;

use super::traits::{validate_entity_type, MirrorFilter, MirrorStore, StoreError};
use crate::record::{MirrorRecord, RawRecord};
use crate::resilience::retry::{retry, RetryConfig};
use crate::tenant::TenantKeys;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

pub(crate) fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Read a text column as String first (SQLite TEXT), then as bytes
/// (MySQL LONGTEXT via the Any driver).
pub(crate) fn read_text(row: &sqlx::any::AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

pub struct SqlMirrorStore {
    pool: AnyPool,
    is_sqlite: bool,
    ready_tables: Mutex<HashSet<String>>,
}

impl SqlMirrorStore {
    /// Connect with startup-mode retry (fails fast on bad config).
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        install_drivers();

        let is_sqlite = connection_string.starts_with("sqlite:");

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        let store = Self {
            pool,
            is_sqlite,
            ready_tables: Mutex::new(HashSet::new()),
        };

        if is_sqlite {
            store.enable_wal_mode().await?;
        }

        Ok(store)
    }

    /// Wrap an existing pool (for sharing one pool across stores).
    pub fn with_pool(pool: AnyPool, is_sqlite: bool) -> Self {
        Self {
            pool,
            is_sqlite,
            ready_tables: Mutex::new(HashSet::new()),
        }
    }

    /// Get a clone of the connection pool for sharing with other stores.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.is_sqlite
    }

    /// Enable WAL mode for SQLite: concurrent reads during writes, single
    /// fsync per commit.
    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    fn table_name(entity_type: &str) -> String {
        format!("mirror_{}", entity_type)
    }

    /// Create the entity's table on first touch. The guard set keeps the
    /// DDL from re-running on every call.
    async fn ensure_table(&self, entity_type: &str) -> Result<(), StoreError> {
        validate_entity_type(entity_type)?;

        let mut ready = self.ready_tables.lock().await;
        if ready.contains(entity_type) {
            return Ok(());
        }

        let table = Self::table_name(entity_type);
        let sql = if self.is_sqlite {
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    org_id TEXT NOT NULL,
                    realm_id TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    source_version TEXT,
                    last_synced_at INTEGER NOT NULL,
                    PRIMARY KEY (org_id, realm_id, entity_id)
                )
                "#
            )
        } else {
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    org_id VARCHAR(64) NOT NULL,
                    realm_id VARCHAR(64) NOT NULL,
                    entity_id VARCHAR(255) NOT NULL,
                    payload LONGTEXT NOT NULL,
                    source_version VARCHAR(255),
                    last_synced_at BIGINT NOT NULL,
                    PRIMARY KEY (org_id, realm_id, entity_id),
                    INDEX idx_synced (org_id, realm_id, last_synced_at)
                )
                "#
            )
        };

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if self.is_sqlite {
            let idx = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_synced ON {table} (org_id, realm_id, last_synced_at)"
            );
            sqlx::query(&idx)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        ready.insert(entity_type.to_string());
        Ok(())
    }

    fn row_to_record(
        row: &sqlx::any::AnyRow,
        tenant: &TenantKeys,
    ) -> Result<MirrorRecord, StoreError> {
        let entity_id = read_text(row, "entity_id")
            .ok_or_else(|| StoreError::Backend("No entity_id in row".to_string()))?;
        let payload_text = read_text(row, "payload")
            .ok_or_else(|| StoreError::Backend("No payload in row".to_string()))?;
        let payload = serde_json::from_str(&payload_text)
            .map_err(|e| StoreError::Backend(format!("Bad payload JSON for '{entity_id}': {e}")))?;
        let source_version = read_text(row, "source_version");
        let last_synced_at: i64 = row.try_get("last_synced_at").unwrap_or(0);

        Ok(MirrorRecord {
            tenant: tenant.clone(),
            entity_id,
            payload,
            source_version,
            last_synced_at,
        })
    }
}

#[async_trait]
impl MirrorStore for SqlMirrorStore {
    async fn upsert_many(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        items: &[RawRecord],
        source_version: Option<&str>,
        synced_at_ms: i64,
    ) -> Result<usize, StoreError> {
        self.ensure_table(entity_type).await?;
        if items.is_empty() {
            return Ok(0);
        }

        // Collapse duplicate natural ids before binding, last item winning
        let mut deduped: BTreeMap<&str, &RawRecord> = BTreeMap::new();
        for item in items {
            deduped.insert(item.entity_id.as_str(), item);
        }

        let table = Self::table_name(entity_type);
        let rows: Vec<(&str, String)> = deduped
            .values()
            .map(|item| (item.entity_id.as_str(), item.payload.to_string()))
            .collect();

        // MySQL max_allowed_packet bounds one statement, so chunk the batch;
        // the surrounding transaction keeps all-or-nothing visibility.
        const CHUNK_SIZE: usize = 200;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        for chunk in rows.chunks(CHUNK_SIZE) {
            let placeholders: Vec<&str> = (0..chunk.len()).map(|_| "(?, ?, ?, ?, ?, ?)").collect();

            let sql = if self.is_sqlite {
                format!(
                    "INSERT INTO {table} (org_id, realm_id, entity_id, payload, source_version, last_synced_at) VALUES {} \
                     ON CONFLICT(org_id, realm_id, entity_id) DO UPDATE SET \
                        payload = excluded.payload, \
                        source_version = excluded.source_version, \
                        last_synced_at = excluded.last_synced_at",
                    placeholders.join(", ")
                )
            } else {
                format!(
                    "INSERT INTO {table} (org_id, realm_id, entity_id, payload, source_version, last_synced_at) VALUES {} \
                     ON DUPLICATE KEY UPDATE \
                        payload = VALUES(payload), \
                        source_version = VALUES(source_version), \
                        last_synced_at = VALUES(last_synced_at)",
                    placeholders.join(", ")
                )
            };

            let mut query = sqlx::query(&sql);
            for (entity_id, payload) in chunk {
                query = query
                    .bind(&tenant.org_id)
                    .bind(&tenant.realm_id)
                    .bind(*entity_id)
                    .bind(payload)
                    .bind(source_version)
                    .bind(synced_at_ms);
            }

            query
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.len())
    }

    async fn last_synced_at(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
    ) -> Result<Option<i64>, StoreError> {
        self.ensure_table(entity_type).await?;
        let table = Self::table_name(entity_type);
        let sql =
            format!("SELECT MAX(last_synced_at) AS max_ts FROM {table} WHERE org_id = ? AND realm_id = ?");

        retry("sql_last_synced_at", &RetryConfig::query(), || async {
            let row = sqlx::query(&sql)
                .bind(&tenant.org_id)
                .bind(&tenant.realm_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            // MAX over zero rows is NULL; decode failure means None
            Ok(row.try_get::<i64, _>("max_ts").ok())
        })
        .await
    }

    async fn get_by_id(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        entity_id: &str,
    ) -> Result<Option<MirrorRecord>, StoreError> {
        self.ensure_table(entity_type).await?;
        let table = Self::table_name(entity_type);
        let sql = format!(
            "SELECT entity_id, payload, source_version, last_synced_at FROM {table} \
             WHERE org_id = ? AND realm_id = ? AND entity_id = ?"
        );

        retry("sql_get_by_id", &RetryConfig::query(), || async {
            let row = sqlx::query(&sql)
                .bind(&tenant.org_id)
                .bind(&tenant.realm_id)
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            match row {
                Some(row) => Ok(Some(Self::row_to_record(&row, tenant)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(
        &self,
        entity_type: &str,
        tenant: &TenantKeys,
        filter: &MirrorFilter,
    ) -> Result<Vec<MirrorRecord>, StoreError> {
        self.ensure_table(entity_type).await?;
        let table = Self::table_name(entity_type);

        let sql = match &filter.entity_ids {
            None => format!(
                "SELECT entity_id, payload, source_version, last_synced_at FROM {table} \
                 WHERE org_id = ? AND realm_id = ? ORDER BY entity_id"
            ),
            Some(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders: Vec<&str> = (0..ids.len()).map(|_| "?").collect();
                format!(
                    "SELECT entity_id, payload, source_version, last_synced_at FROM {table} \
                     WHERE org_id = ? AND realm_id = ? AND entity_id IN ({}) ORDER BY entity_id",
                    placeholders.join(", ")
                )
            }
        };

        retry("sql_list", &RetryConfig::query(), || async {
            let mut query = sqlx::query(&sql)
                .bind(&tenant.org_id)
                .bind(&tenant.realm_id);
            if let Some(ids) = &filter.entity_ids {
                for id in ids {
                    query = query.bind(id);
                }
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let mut records = Vec::with_capacity(rows.len());
            for row in &rows {
                records.push(Self::row_to_record(row, tenant)?);
            }
            Ok(records)
        })
        .await
    }
}
