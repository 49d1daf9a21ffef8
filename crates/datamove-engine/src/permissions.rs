//! Bounded cache of security descriptors keyed by permission key.
//!
//! Files in one directory usually share an ACL, so a directory transfer
//! resolves each permission key once. The cache is an explicit object
//! handed to controllers, read-mostly, with insert-if-absent semantics.
//! When full it stops admitting new keys rather than evicting.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

/// Shared permission-key to SDDL cache
#[derive(Clone, Debug)]
pub struct PermissionCache {
    entries: Arc<DashMap<String, Arc<str>>>,
    capacity: usize,
}

impl PermissionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Insert unless present; returns the value now associated with `key`
    ///
    /// A racing insert of the same key keeps whichever landed first. When
    /// the cache is full the value is returned without being stored.
    pub fn insert_if_absent(&self, key: &str, sddl: &str) -> Arc<str> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        if self.entries.len() >= self.capacity {
            return Arc::from(sddl);
        }
        Arc::clone(
            self.entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::from(sddl))
                .value(),
        )
    }

    /// Cached value, or the result of `fetch` inserted if absent
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Arc<str>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let sddl = fetch().await?;
        Ok(self.insert_if_absent(key, &sddl))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
