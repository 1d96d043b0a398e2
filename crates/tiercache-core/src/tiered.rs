//! Per-name cache composing a local and a remote tier.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bus::InvalidationBus;
use crate::descriptor::CacheDescriptor;
use crate::error::{CacheError, Result};
use crate::message::InvalidationMessage;
use crate::tier::{CacheValue, LocalTier, RemoteTier};

/// Which tiers a cache was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TieredCacheMode {
    /// No tier: every operation is a no-op or a miss
    None,
    LocalOnly,
    RemoteOnly,
    /// Local tier in front of the remote tier
    Tiered,
}

impl std::fmt::Display for TieredCacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::LocalOnly => write!(f, "local-only"),
            Self::RemoteOnly => write!(f, "remote-only"),
            Self::Tiered => write!(f, "tiered"),
        }
    }
}

#[derive(Clone)]
enum Tiers {
    None,
    LocalOnly(Arc<dyn LocalTier>),
    RemoteOnly(Arc<dyn RemoteTier>),
    Tiered {
        local: Arc<dyn LocalTier>,
        remote: Arc<dyn RemoteTier>,
    },
}

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub mode: TieredCacheMode,
    /// Approximate number of entries in the local tier
    pub local_entries: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A named cache.
///
/// ## Write Protocol
///
/// Writes are write-invalidate, never write-through: the remote tier is
/// updated first, the writer's own local copy is dropped, then `Evict(key)`
/// is published so every other process drops its local copy. The next read
/// anywhere backfills from the remote tier.
///
/// | Operation         | LocalOnly   | RemoteOnly / Tiered                      |
/// |-------------------|-------------|------------------------------------------|
/// | `get`             | local       | local → remote (backfill local)          |
/// | `put`             | local       | remote, evict local, publish             |
/// | `put_if_absent`   | local CAS   | remote CAS, evict local, publish         |
/// | `evict`           | local       | remote, evict local, publish             |
/// | `evict_if_present`| local       | remote, evict local, publish if removed  |
/// | `clear`           | local       | remote, clear local, publish             |
///
/// Blank keys are ignored by every keyed operation.
pub struct TieredCache {
    descriptor: CacheDescriptor,
    tiers: Tiers,
    bus: Option<InvalidationBus>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TieredCache {
    /// Build a cache. The mode follows from which tiers are present.
    pub fn new(
        descriptor: CacheDescriptor,
        local: Option<Arc<dyn LocalTier>>,
        remote: Option<Arc<dyn RemoteTier>>,
        bus: Option<InvalidationBus>,
    ) -> Self {
        let tiers = match (local, remote) {
            (None, None) => Tiers::None,
            (Some(local), None) => Tiers::LocalOnly(local),
            (None, Some(remote)) => Tiers::RemoteOnly(remote),
            (Some(local), Some(remote)) => Tiers::Tiered { local, remote },
        };
        Self {
            descriptor,
            tiers,
            bus,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CacheDescriptor {
        &self.descriptor
    }

    pub fn mode(&self) -> TieredCacheMode {
        match self.tiers {
            Tiers::None => TieredCacheMode::None,
            Tiers::LocalOnly(_) => TieredCacheMode::LocalOnly,
            Tiers::RemoteOnly(_) => TieredCacheMode::RemoteOnly,
            Tiers::Tiered { .. } => TieredCacheMode::Tiered,
        }
    }

    pub fn local_tier(&self) -> Option<&Arc<dyn LocalTier>> {
        match &self.tiers {
            Tiers::LocalOnly(local) | Tiers::Tiered { local, .. } => Some(local),
            _ => None,
        }
    }

    pub fn remote_tier(&self) -> Option<&Arc<dyn RemoteTier>> {
        match &self.tiers {
            Tiers::RemoteOnly(remote) | Tiers::Tiered { remote, .. } => Some(remote),
            _ => None,
        }
    }

    /// Read a value. Remote tier errors propagate.
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        if is_blank(key) {
            return Ok(None);
        }

        let found = match &self.tiers {
            Tiers::None => None,
            Tiers::LocalOnly(local) => local.get(key).await,
            Tiers::RemoteOnly(remote) => remote.get(key).await?,
            Tiers::Tiered { local, remote } => {
                if let Some(value) = local.get(key).await {
                    tracing::trace!(cache = %self.name(), key = %key, "cache hit (local)");
                    Some(value)
                } else if let Some(value) = remote.get(key).await? {
                    tracing::trace!(cache = %self.name(), key = %key, "cache hit (remote)");
                    local.put(key, Arc::clone(&value)).await;
                    Some(value)
                } else {
                    None
                }
            }
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(cache = %self.name(), key = %key, "cache miss");
        }
        Ok(found)
    }

    /// Read a value, computing and storing it on a full miss.
    ///
    /// The loaded value is offered to the remote tier with a check-and-set;
    /// if a writer stored a value while the loader ran, that value wins and
    /// is returned instead. The local tier is backfilled with whichever value
    /// the remote tier holds. Filling is a read path and publishes nothing.
    /// Loader errors propagate and nothing is stored. A blank key calls the
    /// loader without caching.
    pub async fn get_with<F, Fut>(&self, key: &str, loader: F) -> Result<CacheValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        if is_blank(key) {
            return Ok(Arc::new(loader().await?));
        }
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let loaded: CacheValue = Arc::new(loader().await.map_err(CacheError::Loader)?);
        let value = match &self.tiers {
            Tiers::None => loaded,
            Tiers::LocalOnly(local) => {
                local.put(key, Arc::clone(&loaded)).await;
                loaded
            }
            Tiers::RemoteOnly(remote) => self.fill_remote(remote.as_ref(), key, loaded).await?,
            Tiers::Tiered { local, remote } => {
                let value = self.fill_remote(remote.as_ref(), key, loaded).await?;
                local.put(key, Arc::clone(&value)).await;
                value
            }
        };
        tracing::debug!(cache = %self.name(), key = %key, "cache filled from loader");
        Ok(value)
    }

    /// Store `loaded` unless a concurrent writer got there first.
    async fn fill_remote(
        &self,
        remote: &dyn RemoteTier,
        key: &str,
        loaded: CacheValue,
    ) -> Result<CacheValue> {
        let existing = remote
            .put_if_absent(key, Arc::clone(&loaded), self.descriptor.ttl())
            .await?;
        match existing {
            Some(current) => {
                tracing::debug!(
                    cache = %self.name(),
                    key = %key,
                    "loaded value discarded, newer write present"
                );
                Ok(current)
            }
            None => Ok(loaded),
        }
    }

    /// Store a value.
    pub async fn put(&self, key: &str, value: impl Into<CacheValue>) -> Result<()> {
        if is_blank(key) {
            return Ok(());
        }
        let value = value.into();

        match &self.tiers {
            Tiers::None => return Ok(()),
            Tiers::LocalOnly(local) => {
                local.put(key, value).await;
                return Ok(());
            }
            Tiers::RemoteOnly(remote) => {
                remote.put(key, value, self.descriptor.ttl()).await?;
            }
            Tiers::Tiered { local, remote } => {
                remote.put(key, value, self.descriptor.ttl()).await?;
                local.evict(key).await;
            }
        }

        tracing::debug!(cache = %self.name(), key = %key, "cache put (remote), invalidating");
        self.publish(InvalidationMessage::evict(self.name(), key));
        Ok(())
    }

    /// Store a value unless the key is taken. Returns the existing value if it was.
    ///
    /// With a remote tier the check-and-set is atomic on the remote tier and
    /// an eviction is published whatever the outcome.
    pub async fn put_if_absent(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
    ) -> Result<Option<CacheValue>> {
        if is_blank(key) {
            return Ok(None);
        }
        let value = value.into();

        let previous = match &self.tiers {
            Tiers::None => return Ok(None),
            Tiers::LocalOnly(local) => return Ok(local.put_if_absent(key, value).await),
            Tiers::RemoteOnly(remote) => {
                remote
                    .put_if_absent(key, value, self.descriptor.ttl())
                    .await?
            }
            Tiers::Tiered { local, remote } => {
                let previous = remote
                    .put_if_absent(key, value, self.descriptor.ttl())
                    .await?;
                local.evict(key).await;
                previous
            }
        };

        self.publish(InvalidationMessage::evict(self.name(), key));
        Ok(previous)
    }

    /// Remove a key everywhere.
    pub async fn evict(&self, key: &str) -> Result<()> {
        if is_blank(key) {
            return Ok(());
        }
        match &self.tiers {
            Tiers::None => return Ok(()),
            Tiers::LocalOnly(local) => {
                local.evict(key).await;
                return Ok(());
            }
            Tiers::RemoteOnly(remote) => {
                remote.evict(key).await?;
            }
            Tiers::Tiered { local, remote } => {
                remote.evict(key).await?;
                local.evict(key).await;
            }
        }

        self.publish(InvalidationMessage::evict(self.name(), key));
        Ok(())
    }

    /// Remove a key, reporting whether the authoritative tier held it.
    ///
    /// Publishes only when something was removed.
    pub async fn evict_if_present(&self, key: &str) -> Result<bool> {
        if is_blank(key) {
            return Ok(false);
        }
        let removed = match &self.tiers {
            Tiers::None => return Ok(false),
            Tiers::LocalOnly(local) => return Ok(local.evict(key).await),
            Tiers::RemoteOnly(remote) => remote.evict(key).await?,
            Tiers::Tiered { local, remote } => {
                let removed = remote.evict(key).await?;
                local.evict(key).await;
                removed
            }
        };

        if removed {
            self.publish(InvalidationMessage::evict(self.name(), key));
        }
        Ok(removed)
    }

    /// Drop every entry of this cache everywhere.
    pub async fn clear(&self) -> Result<()> {
        match &self.tiers {
            Tiers::None => return Ok(()),
            Tiers::LocalOnly(local) => {
                local.clear().await;
                return Ok(());
            }
            Tiers::RemoteOnly(remote) => remote.clear().await?,
            Tiers::Tiered { local, remote } => {
                remote.clear().await?;
                local.clear().await;
            }
        }

        tracing::info!(cache = %self.name(), "cache cleared");
        self.publish(InvalidationMessage::clear(self.name()));
        Ok(())
    }

    /// Best-effort clear of both tiers without broadcasting.
    ///
    /// Never reports success: the return value is always `false`, so callers
    /// must not rely on it.
    pub async fn invalidate(&self) -> bool {
        if let Some(local) = self.local_tier() {
            local.clear().await;
        }
        if let Some(remote) = self.remote_tier()
            && let Err(e) = remote.clear().await
        {
            tracing::warn!(cache = %self.name(), error = %e, "remote invalidate failed");
        }
        false
    }

    /// Drop a key from the local tier only. Never publishes.
    pub async fn evict_local(&self, key: &str) {
        if is_blank(key) {
            return;
        }
        if let Some(local) = self.local_tier() {
            local.evict(key).await;
        }
    }

    /// Drop the local tier only. Never publishes.
    pub async fn clear_local(&self) {
        if let Some(local) = self.local_tier() {
            local.clear().await;
        }
    }

    /// Read and decode a MessagePack value.
    ///
    /// An undecodable entry is treated as a miss.
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(data) = self.get(key).await? else {
            return Ok(None);
        };
        match rmp_serde::from_slice::<T>(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    cache = %self.name(),
                    key = %key,
                    error = %e,
                    "Failed to deserialize cached value"
                );
                Ok(None)
            }
        }
    }

    /// Encode a value with MessagePack and store it.
    pub async fn put_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data =
            rmp_serde::to_vec_named(value).map_err(|e| CacheError::serialization(e.to_string()))?;
        self.put(key, data).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mode: self.mode(),
            local_entries: self.local_tier().map_or(0, |local| local.entry_count()),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn publish(&self, message: InvalidationMessage) {
        if let Some(bus) = &self.bus {
            bus.publish(&message);
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.descriptor.name)
            .field("mode", &self.mode())
            .finish()
    }
}

fn is_blank(key: &str) -> bool {
    key.trim().is_empty()
}
