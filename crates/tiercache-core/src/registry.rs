//! Name → cache mapping.
//!
//! Caches come from two places:
//!
//! 1. **Declarations** registered at startup (local-only, remote-only and
//!    tiered lists). Invalid or duplicate entries are logged and skipped.
//! 2. **Encoded names** materialized on first [`CacheRegistry::get_cache`]
//!    call, e.g. `orders_60_30_10#lr` (see [`crate::naming`]).
//!
//! Names are case-insensitive. Concurrent creators of the same name agree on
//! a single stored instance.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::InvalidationBus;
use crate::descriptor::CacheDescriptor;
use crate::error::{CacheError, Result};
use crate::naming::{self, TierLayout};
use crate::refresh::{Recompute, RefreshScheduler, refresh_identity};
use crate::tier::{LocalTier, MokaLocalTier, RemoteTier, RemoteTierFactory};
use crate::tiered::TieredCache;

/// Caches declared up front, grouped by tier layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDeclarations {
    #[serde(default)]
    pub local: Vec<CacheDescriptor>,
    #[serde(default)]
    pub remote: Vec<CacheDescriptor>,
    #[serde(default)]
    pub tiered: Vec<CacheDescriptor>,
}

/// Sizing applied to every local tier the registry creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalTierSettings {
    /// Entry bound per cache (`None` = unbounded)
    pub max_entries: Option<u64>,
}

pub struct CacheRegistry {
    caches: DashMap<String, Arc<TieredCache>>,
    bus: InvalidationBus,
    remote_factory: Option<Arc<dyn RemoteTierFactory>>,
    local_settings: LocalTierSettings,
    scheduler: RefreshScheduler,
    shutdown: CancellationToken,
}

impl CacheRegistry {
    /// Create an empty registry.
    ///
    /// Without a remote factory every remote-only or tiered cache is
    /// materialized as local-only.
    pub fn new(bus: InvalidationBus, remote_factory: Option<Arc<dyn RemoteTierFactory>>) -> Self {
        Self {
            caches: DashMap::new(),
            bus,
            remote_factory,
            local_settings: LocalTierSettings::default(),
            scheduler: RefreshScheduler::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_local_settings(mut self, settings: LocalTierSettings) -> Self {
        self.local_settings = settings;
        self
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    /// Whether caches get a remote tier.
    pub fn is_distributed(&self) -> bool {
        self.remote_factory.is_some()
    }

    /// Register every declared cache. Returns the number newly registered.
    pub fn register_declarations(&self, declarations: &CacheDeclarations) -> usize {
        let groups = [
            (TierLayout::Local, &declarations.local),
            (TierLayout::Remote, &declarations.remote),
            (TierLayout::Tiered, &declarations.tiered),
        ];

        let mut registered = 0;
        for (layout, descriptors) in groups {
            for descriptor in descriptors {
                match self.register(layout, descriptor.clone()) {
                    Ok(true) => registered += 1,
                    Ok(false) => tracing::warn!(
                        cache = %descriptor.name,
                        %layout,
                        "duplicate cache declaration skipped"
                    ),
                    Err(e) => tracing::error!(
                        cache = %descriptor.name,
                        %layout,
                        error = %e,
                        "invalid cache declaration skipped"
                    ),
                }
            }
        }

        tracing::info!(
            registered,
            total = self.caches.len(),
            remote = self.remote_factory.as_ref().map_or("none", |f| f.name()),
            "cache declarations registered"
        );
        registered
    }

    /// Validate and register one cache. Returns `false` if the name is taken.
    pub fn register(&self, layout: TierLayout, descriptor: CacheDescriptor) -> Result<bool> {
        descriptor.validate()?;
        let key = descriptor.name.to_lowercase();
        if self.caches.contains_key(&key) {
            return Ok(false);
        }
        let cache = Arc::new(self.build(layout, descriptor));
        let (_, inserted) = self.insert_if_absent(key, cache);
        Ok(inserted)
    }

    /// Get a cache, materializing it from its encoded name when unknown.
    ///
    /// Returns `None` (and logs) when the name is not registered and cannot
    /// be decoded, or decodes into an invalid descriptor.
    pub fn get_cache(&self, name: &str) -> Option<Arc<TieredCache>> {
        if name.trim().is_empty() {
            return None;
        }
        if let Some(cache) = self.lookup(name) {
            return Some(cache);
        }

        let Some((layout, descriptor)) = naming::decode(name) else {
            tracing::warn!(cache = %name, "no cache");
            return None;
        };
        if let Err(e) = descriptor.validate() {
            tracing::error!(cache = %name, error = %e, "cannot create cache from name");
            return None;
        }

        let cache = Arc::new(self.build(layout, descriptor));
        let (winner, inserted) = self.insert_if_absent(name.to_lowercase(), cache);
        if inserted {
            tracing::info!(
                cache = %name,
                %layout,
                mode = %winner.mode(),
                "cache created from name"
            );
        }
        Some(winner)
    }

    /// Get a registered cache without creating one.
    pub fn lookup(&self, name: &str) -> Option<Arc<TieredCache>> {
        self.caches
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the registered (lower-cased) names.
    pub fn get_cache_names(&self) -> BTreeSet<String> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Drop a cache and stop its refresh tasks.
    pub fn remove_cache(&self, name: &str) -> Option<Arc<TieredCache>> {
        let (_, cache) = self.caches.remove(&name.to_lowercase())?;
        self.scheduler.cancel_cache(name);
        tracing::info!(cache = %name, "cache removed");
        Some(cache)
    }

    /// Register a refresher for `key` in each named cache.
    ///
    /// The identity is derived from the cache name and `args`, so repeated
    /// registrations for the same call are ignored. Returns how many new
    /// refresh tasks were started.
    pub fn register_refresh<A: Serialize + ?Sized>(
        &self,
        cache_names: &[&str],
        key: &str,
        args: &A,
        recompute: Recompute,
    ) -> Result<usize> {
        if key.trim().is_empty() {
            return Err(CacheError::configuration("refresh key is blank"));
        }

        let mut started = 0;
        for name in cache_names {
            let Some(cache) = self.get_cache(name) else {
                continue;
            };
            let identity = refresh_identity(cache.name(), args)?;
            if self
                .scheduler
                .register(identity, key, Arc::clone(&recompute), cache)
            {
                started += 1;
            }
        }
        Ok(started)
    }

    /// Subscribe to the bus and apply invalidations from peers.
    ///
    /// The listener holds a weak handle, so dropping the last registry
    /// reference stops it along with every refresh task.
    pub async fn start_listener(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        self.bus
            .listen(Arc::downgrade(self), self.shutdown.child_token())
            .await
    }

    /// Stop the listener and every refresh task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.shutdown();
    }

    fn insert_if_absent(&self, key: String, cache: Arc<TieredCache>) -> (Arc<TieredCache>, bool) {
        let winner = Arc::clone(self.caches.entry(key).or_insert(Arc::clone(&cache)).value());
        let inserted = Arc::ptr_eq(&winner, &cache);
        (winner, inserted)
    }

    fn build(&self, layout: TierLayout, descriptor: CacheDescriptor) -> TieredCache {
        let (layout, remote): (TierLayout, Option<Arc<dyn RemoteTier>>) =
            match (&self.remote_factory, layout.uses_remote()) {
                (Some(factory), true) => (layout, Some(factory.create(&descriptor))),
                (None, true) => {
                    tracing::warn!(
                        cache = %descriptor.name,
                        %layout,
                        "no remote tier available, falling back to local-only"
                    );
                    (TierLayout::Local, None)
                }
                (_, false) => (layout, None),
            };

        let local: Option<Arc<dyn LocalTier>> = if layout.uses_local() {
            Some(Arc::new(MokaLocalTier::new(
                descriptor.ttl(),
                self.local_settings.max_entries,
            )))
        } else {
            None
        };

        TieredCache::new(descriptor, local, remote, Some(self.bus.clone()))
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &self.caches.len())
            .field("refresh_tasks", &self.scheduler.task_count())
            .field("distributed", &self.is_distributed())
            .finish()
    }
}
