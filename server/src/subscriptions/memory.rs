//! In-memory `SubscriptionStore`.
//!
//! Sets live in a `DashMap<String, HashSet<String>>`; nothing survives a
//! restart. Reads and writes can be switched into failure mode, and writes to
//! a single key can be failed, so callers' partial-failure handling can be
//! exercised without a real backend.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{StoreError, StoreResult, SubscriptionStore};

#[derive(Default)]
pub struct MemorySubscriptionStore {
    sets: DashMap<String, HashSet<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Keys whose writes always fail
    poisoned_keys: DashSet<String>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_for_key(&self, key: &str) {
        self.poisoned_keys.insert(key.to_string());
    }

    /// Current members of a set, sorted.
    pub fn members(&self, key: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn add_member(&self, key: &str, member: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) || self.poisoned_keys.contains(key) {
            return Err(StoreError::Unavailable(format!("write to {} rejected", key)));
        }
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("read of {} rejected", key)));
        }
        Ok(self
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = MemorySubscriptionStore::new();
        store.add_member("k", "a").await.unwrap();
        store.add_member("k", "a").await.unwrap();
        store.add_member("k", "b").await.unwrap();
        assert_eq!(store.members("k"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_poisoned_key_only_fails_that_key() {
        let store = MemorySubscriptionStore::new();
        store.fail_writes_for_key("bad");
        assert!(store.add_member("bad", "a").await.is_err());
        assert!(store.add_member("good", "a").await.is_ok());
        assert!(store.is_member("good", "a").await.unwrap());
    }
}
