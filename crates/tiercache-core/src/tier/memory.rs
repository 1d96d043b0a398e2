//! In-memory remote tier.
//!
//! A [`MemoryRemoteStore`] stands in for a shared key/value server: every
//! cache handle created from the same store sees the same entries, which is
//! how several registries in one process share a "remote" tier. Useful for
//! single-node deployments and for exercising the invalidation protocol in
//! tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{CacheValue, RemoteTier, RemoteTierFactory, namespace};
use crate::descriptor::CacheDescriptor;
use crate::error::Result;

/// A stored entry with TTL support.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: CacheValue,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: CacheValue, ttl: Duration) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Writes between two sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// Shared key/value store with per-entry TTL.
///
/// Expired entries are dropped when read and swept from the whole store
/// every `sweep_interval` writes.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    entries: DashMap<String, CachedEntry>,
    writes: AtomicU64,
    sweep_interval: u64,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_sweep_interval(sweep_interval: u64) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// Number of stored entries, expired ones included until cleaned up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Count a write, sweeping expired entries every `sweep_interval` writes.
    ///
    /// Must not be called while holding a guard into `entries`.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_interval == 0 {
            let removed = self.cleanup_expired();
            if removed > 0 {
                tracing::trace!(removed, "swept expired remote entries");
            }
        }
    }
}

/// Handle to one cache's namespace inside a [`MemoryRemoteStore`].
pub struct MemoryRemoteTier {
    store: Arc<MemoryRemoteStore>,
    namespace: String,
}

impl MemoryRemoteTier {
    pub fn new(store: Arc<MemoryRemoteStore>, cache_name: &str) -> Self {
        Self {
            store,
            namespace: namespace(cache_name),
        }
    }

    #[inline]
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl RemoteTier for MemoryRemoteTier {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let key = self.key(key);
        if let Some(entry) = self.store.entries.get(&key) {
            if !entry.is_expired() {
                return Ok(Some(Arc::clone(&entry.data)));
            }
            drop(entry);
            self.store.entries.remove(&key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<()> {
        self.store
            .entries
            .insert(self.key(key), CachedEntry::new(value, ttl));
        self.store.record_write();
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<Option<CacheValue>> {
        let existing = match self.store.entries.entry(self.key(key)) {
            Entry::Occupied(existing) if !existing.get().is_expired() => {
                return Ok(Some(Arc::clone(&existing.get().data)));
            }
            Entry::Occupied(mut expired) => {
                expired.insert(CachedEntry::new(value, ttl));
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(CachedEntry::new(value, ttl));
                None
            }
        };
        self.store.record_write();
        Ok(existing)
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        Ok(self
            .store
            .entries
            .remove(&self.key(key))
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn clear(&self) -> Result<()> {
        self.store
            .entries
            .retain(|key, _| !key.starts_with(&self.namespace));
        Ok(())
    }
}

/// Creates [`MemoryRemoteTier`] handles over one shared store.
#[derive(Clone)]
pub struct MemoryRemoteFactory {
    store: Arc<MemoryRemoteStore>,
}

impl MemoryRemoteFactory {
    pub fn new(store: Arc<MemoryRemoteStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MemoryRemoteStore> {
        &self.store
    }
}

impl RemoteTierFactory for MemoryRemoteFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, descriptor: &CacheDescriptor) -> Arc<dyn RemoteTier> {
        Arc::new(MemoryRemoteTier::new(Arc::clone(&self.store), &descriptor.name))
    }
}
