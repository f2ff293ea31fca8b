//! Tenant partition keys.
//!
//! Every mirror row, audit entry, and idempotency record is logically
//! partitioned by [`TenantKeys`]. Stores are shared physically across
//! tenants; no cross-tenant locking exists anywhere in the crate.

use serde::{Deserialize, Serialize};

/// Identifies one tenant's connection to one rail account.
///
/// `org_id` is the customer organisation; `realm_id` is the connected
/// account on the rail side (one org may connect several realms).
///
/// # Example
///
/// ```
/// use mirror_sync::TenantKeys;
///
/// let tenant = TenantKeys::new("org-42", "realm-7");
/// assert_eq!(tenant.to_string(), "org-42/realm-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKeys {
    /// Customer organisation id
    pub org_id: String,
    /// Rail-side account id
    pub realm_id: String,
}

impl TenantKeys {
    pub fn new(org_id: impl Into<String>, realm_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            realm_id: realm_id.into(),
        }
    }
}

impl std::fmt::Display for TenantKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org_id, self.realm_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_display_joins_with_slash() {
        let tenant = TenantKeys::new("acme", "us-east");
        assert_eq!(format!("{}", tenant), "acme/us-east");
    }

    #[test]
    fn test_equality_and_hashing() {
        let a = TenantKeys::new("acme", "r1");
        let b = TenantKeys::new("acme", "r1");
        let c = TenantKeys::new("acme", "r2");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
        assert!(!map.contains_key(&c));
    }

    #[test]
    fn test_serde_round_trip() {
        let tenant = TenantKeys::new("acme", "r1");
        let json = serde_json::to_string(&tenant).unwrap();
        let back: TenantKeys = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tenant);
    }
}
