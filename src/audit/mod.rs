//! Append-only audit log and hygiene flags.
//!
//! Every inbound fetch attempt and outbound write attempt leaves a
//! [`LogEntry`], success or failure — the log is written *before* the
//! mirror is mutated on the inbound path, so the audit trail always
//! reflects attempted fetches. [`HygieneFlag`]s are durable markers that a
//! sync or write produced anomalous state needing operator attention.
//!
//! No update or delete operation exists on either surface.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::record::now_ms;
use crate::tenant::TenantKeys;

/// Which way the data crossed the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStatus {
    Ok,
    Failed,
    /// The remote side succeeded but local bookkeeping could not be
    /// completed; needs reconciliation.
    Flagged,
}

impl LogStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Flagged => "flagged",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit row. Append-only; constructed through the helpers below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub direction: Direction,
    /// Rail short name (e.g. "qbo")
    pub rail: String,
    /// Operation name ("fetch" for inbound, the caller's operation for
    /// outbound)
    pub operation: String,
    /// Entity type for inbound syncs and entity-scoped writes
    pub entity_type: Option<String>,
    pub tenant: TenantKeys,
    pub idem_key: Option<String>,
    pub status_code: Option<u16>,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub source_version: Option<String>,
    pub payload_snapshot: Value,
    pub created_at: i64,
}

impl LogEntry {
    pub fn inbound_ok(
        rail: &str,
        entity_type: &str,
        tenant: &TenantKeys,
        source_version: &str,
        payload_snapshot: Value,
    ) -> Self {
        Self {
            direction: Direction::In,
            rail: rail.to_string(),
            operation: "fetch".to_string(),
            entity_type: Some(entity_type.to_string()),
            tenant: tenant.clone(),
            idem_key: None,
            status_code: None,
            status: LogStatus::Ok,
            error_message: None,
            source_version: Some(source_version.to_string()),
            payload_snapshot,
            created_at: now_ms(),
        }
    }

    pub fn inbound_failed(
        rail: &str,
        entity_type: &str,
        tenant: &TenantKeys,
        error_message: &str,
    ) -> Self {
        Self {
            direction: Direction::In,
            rail: rail.to_string(),
            operation: "fetch".to_string(),
            entity_type: Some(entity_type.to_string()),
            tenant: tenant.clone(),
            idem_key: None,
            status_code: None,
            status: LogStatus::Failed,
            error_message: Some(error_message.to_string()),
            source_version: None,
            payload_snapshot: Value::Null,
            created_at: now_ms(),
        }
    }

    pub fn outbound_ok(
        rail: &str,
        operation: &str,
        entity_type: Option<&str>,
        tenant: &TenantKeys,
        idem_key: Option<&str>,
        payload_snapshot: Value,
    ) -> Self {
        Self {
            direction: Direction::Out,
            rail: rail.to_string(),
            operation: operation.to_string(),
            entity_type: entity_type.map(str::to_string),
            tenant: tenant.clone(),
            idem_key: idem_key.map(str::to_string),
            status_code: None,
            status: LogStatus::Ok,
            error_message: None,
            source_version: None,
            payload_snapshot,
            created_at: now_ms(),
        }
    }

    pub fn outbound_failed(
        rail: &str,
        operation: &str,
        entity_type: Option<&str>,
        tenant: &TenantKeys,
        idem_key: Option<&str>,
        status_code: u16,
        error_message: &str,
        payload_snapshot: Value,
    ) -> Self {
        Self {
            direction: Direction::Out,
            rail: rail.to_string(),
            operation: operation.to_string(),
            entity_type: entity_type.map(str::to_string),
            tenant: tenant.clone(),
            idem_key: idem_key.map(str::to_string),
            status_code: Some(status_code),
            status: LogStatus::Failed,
            error_message: Some(error_message.to_string()),
            source_version: None,
            payload_snapshot,
            created_at: now_ms(),
        }
    }

    pub fn outbound_flagged(
        rail: &str,
        operation: &str,
        entity_type: Option<&str>,
        tenant: &TenantKeys,
        idem_key: Option<&str>,
        error_message: &str,
        payload_snapshot: Value,
    ) -> Self {
        Self {
            direction: Direction::Out,
            rail: rail.to_string(),
            operation: operation.to_string(),
            entity_type: entity_type.map(str::to_string),
            tenant: tenant.clone(),
            idem_key: idem_key.map(str::to_string),
            status_code: None,
            status: LogStatus::Flagged,
            error_message: Some(error_message.to_string()),
            source_version: None,
            payload_snapshot,
            created_at: now_ms(),
        }
    }
}

/// Durable marker for operator follow-up (e.g. `sync_error_bills`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HygieneFlag {
    pub tenant: TenantKeys,
    pub code: String,
    pub created_at: i64,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit backend error: {0}")]
    Backend(String),
}

/// Append-only audit surface. Queries are tenant-scoped; there is no way
/// to mutate or remove history through this trait.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<(), AuditError>;

    async fn flag_hygiene(&self, tenant: &TenantKeys, code: &str) -> Result<(), AuditError>;

    /// Entries for one (tenant, entity type), oldest first.
    async fn entries_for(
        &self,
        tenant: &TenantKeys,
        entity_type: &str,
    ) -> Result<Vec<LogEntry>, AuditError>;

    /// Hygiene flags for a tenant, optionally restricted to one code,
    /// oldest first.
    async fn flags_for(
        &self,
        tenant: &TenantKeys,
        code: Option<&str>,
    ) -> Result<Vec<HygieneFlag>, AuditError>;
}

pub use memory::MemoryAuditLog;
pub use sql::SqlAuditLog;
