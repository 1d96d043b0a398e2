//! Local tier backed by moka.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use super::{CacheValue, LocalTier};

/// Bounded, TTL-based in-memory tier.
///
/// Entries expire `ttl` after they were written. When `max_entries` is set
/// moka evicts least-valuable entries past that size.
pub struct MokaLocalTier {
    cache: Cache<String, CacheValue>,
}

impl MokaLocalTier {
    pub fn new(ttl: Duration, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().time_to_live(ttl);
        if let Some(max) = max_entries {
            builder = builder.max_capacity(max);
        }
        Self {
            cache: builder.build(),
        }
    }
}

#[async_trait]
impl LocalTier for MokaLocalTier {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        self.cache.get(key).await
    }

    async fn put(&self, key: &str, value: CacheValue) {
        self.cache.insert(key.to_string(), value).await;
    }

    async fn put_if_absent(&self, key: &str, value: CacheValue) -> Option<CacheValue> {
        let entry = self.cache.entry(key.to_string()).or_insert(value).await;
        if entry.is_fresh() {
            None
        } else {
            Some(entry.into_value())
        }
    }

    async fn evict(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    async fn clear(&self) {
        self.cache.invalidate_all();
    }

    fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
