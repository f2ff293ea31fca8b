// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL idempotency store.
//!
//! A single table with `idem_key` as primary key. The atomic
//! check-and-insert rides on the key's uniqueness constraint: a
//! conditional insert (`INSERT OR IGNORE` / `INSERT IGNORE`) that affects
//! zero rows means another record already holds the key.

use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tokio::sync::OnceCell;

use super::{IdemError, IdempotencyRecord, IdempotencyStore, PutOutcome};
use crate::mirror::sql::read_text;
use crate::record::RawRecord;
use crate::resilience::retry::{retry, RetryConfig};
use crate::tenant::TenantKeys;

pub struct SqlIdempotencyStore {
    pool: AnyPool,
    is_sqlite: bool,
    schema_ready: OnceCell<()>,
}

impl SqlIdempotencyStore {
    pub fn with_pool(pool: AnyPool, is_sqlite: bool) -> Self {
        Self {
            pool,
            is_sqlite,
            schema_ready: OnceCell::new(),
        }
    }

    pub async fn init_schema(&self) -> Result<(), IdemError> {
        self.schema_ready
            .get_or_try_init(|| self.create_table())
            .await?;
        Ok(())
    }

    async fn create_table(&self) -> Result<(), IdemError> {
        let sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_records (
                idem_key TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                realm_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                result_entity_id TEXT NOT NULL,
                result_payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_records (
                idem_key VARCHAR(64) PRIMARY KEY,
                org_id VARCHAR(64) NOT NULL,
                realm_id VARCHAR(64) NOT NULL,
                operation VARCHAR(128) NOT NULL,
                result_entity_id VARCHAR(255) NOT NULL,
                result_payload LONGTEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#
        };

        retry("idem_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| IdemError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    fn row_to_record(row: &sqlx::any::AnyRow, idem_key: &str) -> Result<IdempotencyRecord, IdemError> {
        let payload_text = read_text(row, "result_payload")
            .ok_or_else(|| IdemError::Corrupt(idem_key.to_string(), "missing payload".into()))?;
        let payload = serde_json::from_str(&payload_text)
            .map_err(|e| IdemError::Corrupt(idem_key.to_string(), e.to_string()))?;

        Ok(IdempotencyRecord {
            idem_key: idem_key.to_string(),
            tenant: TenantKeys::new(
                read_text(row, "org_id").unwrap_or_default(),
                read_text(row, "realm_id").unwrap_or_default(),
            ),
            operation: read_text(row, "operation").unwrap_or_default(),
            result: RawRecord::new(
                read_text(row, "result_entity_id").unwrap_or_default(),
                payload,
            ),
            created_at: row.try_get("created_at").unwrap_or(0),
        })
    }

    async fn fetch(&self, idem_key: &str) -> Result<Option<IdempotencyRecord>, IdemError> {
        let row = sqlx::query(
            "SELECT org_id, realm_id, operation, result_entity_id, result_payload, created_at \
             FROM idempotency_records WHERE idem_key = ?",
        )
        .bind(idem_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IdemError::Backend(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row, idem_key)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl IdempotencyStore for SqlIdempotencyStore {
    async fn find(&self, idem_key: &str) -> Result<Option<IdempotencyRecord>, IdemError> {
        self.init_schema().await?;
        retry("idem_find", &RetryConfig::query(), || self.fetch(idem_key)).await
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> Result<PutOutcome, IdemError> {
        self.init_schema().await?;

        let sql = if self.is_sqlite {
            "INSERT OR IGNORE INTO idempotency_records \
             (idem_key, org_id, realm_id, operation, result_entity_id, result_payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        } else {
            "INSERT IGNORE INTO idempotency_records \
             (idem_key, org_id, realm_id, operation, result_entity_id, result_payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        };

        let payload = record.result.payload.to_string();
        let result = sqlx::query(sql)
            .bind(&record.idem_key)
            .bind(&record.tenant.org_id)
            .bind(&record.tenant.realm_id)
            .bind(&record.operation)
            .bind(&record.result.entity_id)
            .bind(&payload)
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| IdemError::Backend(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(PutOutcome::Inserted);
        }

        // Lost the race: surface whoever won
        match self.fetch(&record.idem_key).await? {
            Some(existing) => Ok(PutOutcome::Existing(existing)),
            None => Err(IdemError::Backend(format!(
                "conditional insert for '{}' affected no rows but key is absent",
                record.idem_key
            ))),
        }
    }
}
