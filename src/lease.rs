// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyed short-lived leases.
//!
//! A [`LeaseMap`] hands out at most one guard per key at a time. Waiters
//! queue on the key's mutex up to a bounded timeout and then give up —
//! nothing here blocks indefinitely. The read path uses a lease per
//! `(tenant, entity_type)` to collapse concurrent fetches into one
//! upstream call; the write path uses a lease per idempotency key to
//! serialize identical writes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

type Slots = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Map of keyed leases. Cloneable; clones share the same slots.
#[derive(Clone, Default)]
pub struct LeaseMap {
    slots: Slots,
}

/// Held lease. Dropping it releases the key and removes the slot when no
/// other holder or waiter has a handle to it.
pub struct LeaseGuard {
    key: String,
    slots: Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LeaseMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Number of live slots (held or recently contended keys)
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Acquire the lease for `key`, waiting at most `wait`. Returns None
    /// when the wait expires with the lease still held elsewhere.
    pub async fn acquire(&self, key: &str, wait: Duration) -> Option<LeaseGuard> {
        let slot = {
            let entry = self
                .slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            entry.value().clone()
        };

        match timeout(wait, slot.lock_owned()).await {
            Ok(guard) => Some(LeaseGuard {
                key: key.to_string(),
                slots: Arc::clone(&self.slots),
                guard: Some(guard),
            }),
            Err(_) => None,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // Release the lock before inspecting the slot
        self.guard.take();
        // A strong count of 1 means only the map itself still references
        // the slot: no holder, no waiter. remove_if holds the shard lock,
        // so a racing acquire either sees the slot before removal (count
        // > 1, not removed) or creates a fresh one after.
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_acquire_uncontended() {
        let leases = LeaseMap::new();
        let guard = leases.acquire("k1", Duration::from_millis(10)).await;
        assert!(guard.is_some());
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let leases = LeaseMap::new();
        let _held = leases.acquire("k1", Duration::from_millis(10)).await.unwrap();

        let second = leases.acquire("k1", Duration::from_millis(20)).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let leases = LeaseMap::new();
        let held = leases.acquire("k1", Duration::from_millis(10)).await.unwrap();
        drop(held);

        let again = leases.acquire("k1", Duration::from_millis(10)).await;
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let leases = LeaseMap::new();
        let _a = leases.acquire("k1", Duration::from_millis(10)).await.unwrap();
        let b = leases.acquire("k2", Duration::from_millis(10)).await;
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn test_slot_is_cleaned_up_after_release() {
        let leases = LeaseMap::new();
        let guard = leases.acquire("k1", Duration::from_millis(10)).await.unwrap();
        assert_eq!(leases.len(), 1);
        drop(guard);
        assert_eq!(leases.len(), 0);
    }

    #[tokio::test]
    async fn test_waiters_serialize() {
        let leases = LeaseMap::new();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let leases = leases.clone();
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = leases.acquire("k1", Duration::from_secs(5)).await.unwrap();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
