// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL audit log.
//!
//! Two append-only tables: `sync_audit_log` indexed by
//! `(org_id, realm_id, entity_type, created_at)` and `hygiene_flags`
//! indexed by `(org_id, realm_id, code)`. Rows are only ever inserted;
//! there is no UPDATE or DELETE statement anywhere in this module.

use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tokio::sync::OnceCell;

use super::{AuditError, AuditLog, Direction, HygieneFlag, LogEntry, LogStatus};
use crate::mirror::sql::read_text;
use crate::record::now_ms;
use crate::resilience::retry::{retry, RetryConfig};
use crate::tenant::TenantKeys;

pub struct SqlAuditLog {
    pool: AnyPool,
    is_sqlite: bool,
    schema_ready: OnceCell<()>,
}

impl SqlAuditLog {
    /// Wrap a shared pool. Schema is created on first use (or eagerly via
    /// [`init_schema`](Self::init_schema)).
    pub fn with_pool(pool: AnyPool, is_sqlite: bool) -> Self {
        Self {
            pool,
            is_sqlite,
            schema_ready: OnceCell::new(),
        }
    }

    pub async fn init_schema(&self) -> Result<(), AuditError> {
        self.schema_ready
            .get_or_try_init(|| self.create_tables())
            .await?;
        Ok(())
    }

    async fn create_tables(&self) -> Result<(), AuditError> {
        let audit_sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS sync_audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                direction TEXT NOT NULL,
                rail TEXT NOT NULL,
                operation TEXT NOT NULL,
                entity_type TEXT,
                org_id TEXT NOT NULL,
                realm_id TEXT NOT NULL,
                idem_key TEXT,
                status_code INTEGER,
                status TEXT NOT NULL,
                error_message TEXT,
                source_version TEXT,
                payload_snapshot TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS sync_audit_log (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                direction VARCHAR(8) NOT NULL,
                rail VARCHAR(32) NOT NULL,
                operation VARCHAR(128) NOT NULL,
                entity_type VARCHAR(64),
                org_id VARCHAR(64) NOT NULL,
                realm_id VARCHAR(64) NOT NULL,
                idem_key VARCHAR(64),
                status_code INT,
                status VARCHAR(16) NOT NULL,
                error_message TEXT,
                source_version VARCHAR(255),
                payload_snapshot LONGTEXT NOT NULL,
                created_at BIGINT NOT NULL,
                INDEX idx_audit_tenant_entity (org_id, realm_id, entity_type, created_at)
            )
            "#
        };

        let flags_sql = if self.is_sqlite {
            r#"
            CREATE TABLE IF NOT EXISTS hygiene_flags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                org_id TEXT NOT NULL,
                realm_id TEXT NOT NULL,
                code TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#
        } else {
            r#"
            CREATE TABLE IF NOT EXISTS hygiene_flags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                org_id VARCHAR(64) NOT NULL,
                realm_id VARCHAR(64) NOT NULL,
                code VARCHAR(128) NOT NULL,
                created_at BIGINT NOT NULL,
                INDEX idx_flags_tenant_code (org_id, realm_id, code)
            )
            "#
        };

        retry("audit_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(audit_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| AuditError::Backend(e.to_string()))?;
            sqlx::query(flags_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| AuditError::Backend(e.to_string()))?;
            Ok(())
        })
        .await?;

        if self.is_sqlite {
            for idx in [
                "CREATE INDEX IF NOT EXISTS idx_audit_tenant_entity ON sync_audit_log (org_id, realm_id, entity_type, created_at)",
                "CREATE INDEX IF NOT EXISTS idx_flags_tenant_code ON hygiene_flags (org_id, realm_id, code)",
            ] {
                sqlx::query(idx)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| AuditError::Backend(e.to_string()))?;
            }
        }

        Ok(())
    }

    fn parse_direction(raw: &str) -> Direction {
        if raw == "out" {
            Direction::Out
        } else {
            Direction::In
        }
    }

    fn parse_status(raw: &str) -> LogStatus {
        match raw {
            "failed" => LogStatus::Failed,
            "flagged" => LogStatus::Flagged,
            _ => LogStatus::Ok,
        }
    }

    fn row_to_entry(row: &sqlx::any::AnyRow, tenant: &TenantKeys) -> LogEntry {
        let payload_snapshot = read_text(row, "payload_snapshot")
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null);

        LogEntry {
            direction: Self::parse_direction(&read_text(row, "direction").unwrap_or_default()),
            rail: read_text(row, "rail").unwrap_or_default(),
            operation: read_text(row, "operation").unwrap_or_default(),
            entity_type: read_text(row, "entity_type"),
            tenant: tenant.clone(),
            idem_key: read_text(row, "idem_key"),
            status_code: row
                .try_get::<i32, _>("status_code")
                .ok()
                .map(|code| code as u16),
            status: Self::parse_status(&read_text(row, "status").unwrap_or_default()),
            error_message: read_text(row, "error_message"),
            source_version: read_text(row, "source_version"),
            payload_snapshot,
            created_at: row.try_get("created_at").unwrap_or(0),
        }
    }
}

#[async_trait]
impl AuditLog for SqlAuditLog {
    async fn append(&self, entry: LogEntry) -> Result<(), AuditError> {
        self.init_schema().await?;

        let payload = entry.payload_snapshot.to_string();
        sqlx::query(
            "INSERT INTO sync_audit_log \
             (direction, rail, operation, entity_type, org_id, realm_id, idem_key, status_code, status, error_message, source_version, payload_snapshot, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.direction.as_str())
        .bind(&entry.rail)
        .bind(&entry.operation)
        .bind(&entry.entity_type)
        .bind(&entry.tenant.org_id)
        .bind(&entry.tenant.realm_id)
        .bind(&entry.idem_key)
        .bind(entry.status_code.map(|code| code as i32))
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(&entry.source_version)
        .bind(&payload)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn flag_hygiene(&self, tenant: &TenantKeys, code: &str) -> Result<(), AuditError> {
        self.init_schema().await?;

        sqlx::query(
            "INSERT INTO hygiene_flags (org_id, realm_id, code, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&tenant.org_id)
        .bind(&tenant.realm_id)
        .bind(code)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn entries_for(
        &self,
        tenant: &TenantKeys,
        entity_type: &str,
    ) -> Result<Vec<LogEntry>, AuditError> {
        self.init_schema().await?;

        retry("audit_entries_for", &RetryConfig::query(), || async {
            let rows = sqlx::query(
                "SELECT direction, rail, operation, entity_type, idem_key, status_code, status, error_message, source_version, payload_snapshot, created_at \
                 FROM sync_audit_log \
                 WHERE org_id = ? AND realm_id = ? AND entity_type = ? \
                 ORDER BY created_at, id",
            )
            .bind(&tenant.org_id)
            .bind(&tenant.realm_id)
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AuditError::Backend(e.to_string()))?;

            Ok(rows
                .iter()
                .map(|row| Self::row_to_entry(row, tenant))
                .collect())
        })
        .await
    }

    async fn flags_for(
        &self,
        tenant: &TenantKeys,
        code: Option<&str>,
    ) -> Result<Vec<HygieneFlag>, AuditError> {
        self.init_schema().await?;

        retry("audit_flags_for", &RetryConfig::query(), || async {
            let rows = match code {
                Some(code) => {
                    sqlx::query(
                        "SELECT code, created_at FROM hygiene_flags \
                         WHERE org_id = ? AND realm_id = ? AND code = ? ORDER BY created_at, id",
                    )
                    .bind(&tenant.org_id)
                    .bind(&tenant.realm_id)
                    .bind(code)
                    .fetch_all(&self.pool)
                    .await
                }
                None => {
                    sqlx::query(
                        "SELECT code, created_at FROM hygiene_flags \
                         WHERE org_id = ? AND realm_id = ? ORDER BY created_at, id",
                    )
                    .bind(&tenant.org_id)
                    .bind(&tenant.realm_id)
                    .fetch_all(&self.pool)
                    .await
                }
            }
            .map_err(|e| AuditError::Backend(e.to_string()))?;

            Ok(rows
                .iter()
                .map(|row| HygieneFlag {
                    tenant: tenant.clone(),
                    code: read_text(row, "code").unwrap_or_default(),
                    created_at: row.try_get("created_at").unwrap_or(0),
                })
                .collect())
        })
        .await
    }
}
