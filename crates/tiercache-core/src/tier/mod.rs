//! Tier abstractions consumed by [`TieredCache`](crate::TieredCache).
//!
//! - [`LocalTier`]: process-local, bounded, TTL-based. Infallible.
//! - [`RemoteTier`]: shared across processes and authoritative. Every
//!   operation can fail and the error reaches the caller.
//!
//! Values are opaque bytes wrapped in `Arc` so hits clone cheaply.

mod local;
mod memory;

pub use local::MokaLocalTier;
pub use memory::{
    CachedEntry, DEFAULT_SWEEP_INTERVAL, MemoryRemoteFactory, MemoryRemoteStore, MemoryRemoteTier,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::descriptor::{CacheDescriptor, NAMESPACE_SEPARATOR};
use crate::error::Result;

/// Cached payload.
pub type CacheValue = Arc<Vec<u8>>;

/// Process-local tier for a single cache.
#[async_trait]
pub trait LocalTier: Send + Sync {
    /// Get a live entry.
    async fn get(&self, key: &str) -> Option<CacheValue>;

    /// Insert or replace an entry.
    async fn put(&self, key: &str, value: CacheValue);

    /// Insert only if absent. Returns the existing value when there was one.
    async fn put_if_absent(&self, key: &str, value: CacheValue) -> Option<CacheValue>;

    /// Remove an entry, returning whether it was present.
    async fn evict(&self, key: &str) -> bool;

    /// Drop every entry.
    async fn clear(&self);

    /// Approximate number of entries.
    fn entry_count(&self) -> u64;
}

/// Shared tier for a single cache.
///
/// Implementations never store null or absent markers: a missing value is
/// always reported as `Ok(None)`.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    async fn put(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<()>;

    /// Atomic check-and-set. Returns the previous value if the key was taken.
    async fn put_if_absent(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<Option<CacheValue>>;

    /// Delete a key, returning whether something was removed.
    async fn evict(&self, key: &str) -> Result<bool>;

    /// Delete every key belonging to this cache.
    async fn clear(&self) -> Result<()>;
}

/// Creates remote tier handles for caches as they are registered.
pub trait RemoteTierFactory: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    fn create(&self, descriptor: &CacheDescriptor) -> Arc<dyn RemoteTier>;
}

/// Namespace prefix for a cache's keys in a shared store.
pub fn namespace(cache_name: &str) -> String {
    format!("{}{NAMESPACE_SEPARATOR}", cache_name.to_lowercase())
}
