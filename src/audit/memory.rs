use async_trait::async_trait;
use parking_lot::Mutex;

use super::{AuditError, AuditLog, HygieneFlag, LogEntry};
use crate::record::now_ms;
use crate::tenant::TenantKeys;

/// In-memory audit log. Entries accumulate in arrival order; nothing is
/// ever removed.
pub struct MemoryAuditLog {
    entries: Mutex<Vec<LogEntry>>,
    flags: Mutex<Vec<HygieneFlag>>,
}

impl MemoryAuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            flags: Mutex::new(Vec::new()),
        }
    }

    /// Total entry count across all tenants
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: LogEntry) -> Result<(), AuditError> {
        self.entries.lock().push(entry);
        Ok(())
    }

    async fn flag_hygiene(&self, tenant: &TenantKeys, code: &str) -> Result<(), AuditError> {
        self.flags.lock().push(HygieneFlag {
            tenant: tenant.clone(),
            code: code.to_string(),
            created_at: now_ms(),
        });
        Ok(())
    }

    async fn entries_for(
        &self,
        tenant: &TenantKeys,
        entity_type: &str,
    ) -> Result<Vec<LogEntry>, AuditError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|e| e.tenant == *tenant && e.entity_type.as_deref() == Some(entity_type))
            .cloned()
            .collect())
    }

    async fn flags_for(
        &self,
        tenant: &TenantKeys,
        code: Option<&str>,
    ) -> Result<Vec<HygieneFlag>, AuditError> {
        Ok(self
            .flags
            .lock()
            .iter()
            .filter(|f| f.tenant == *tenant && code.map_or(true, |c| f.code == c))
            .cloned()
            .collect())
    }
}
