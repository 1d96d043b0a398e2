//! Proactive background refresh.
//!
//! Each registered (cache, arguments) pair gets one long-lived task:
//!
//! ```text
//! Idle(elapsed = 0) → sleep(refresher_sleep) → elapsed += actual sleep
//!   elapsed <  trigger → back to sleep
//!   elapsed >= trigger → recompute → put → elapsed = 0
//! ```
//!
//! A failed recompute is logged and leaves the current value in place; the
//! elapsed counter resets either way. Refresh writes go through
//! [`TieredCache::put`], so peers see them as ordinary invalidations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};
use crate::tiered::TieredCache;

/// Callback producing a fresh value for a refreshed key.
pub type Recompute = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Vec<u8>>> + Send + Sync>;

/// Wrap an async closure as a [`Recompute`].
pub fn recompute<F, Fut>(f: F) -> Recompute
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Vec<u8>>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Deduplication identity for a refresher: `<cache>:<sha256(args)>`.
///
/// Arguments are hashed through their JSON encoding, so equal arguments map
/// to the same identity regardless of the process computing it.
pub fn refresh_identity<A: Serialize + ?Sized>(cache_name: &str, args: &A) -> Result<String> {
    let encoded =
        serde_json::to_vec(args).map_err(|e| CacheError::serialization(e.to_string()))?;
    let digest = Sha256::digest(&encoded);
    Ok(format!("{}:{}", cache_name.to_lowercase(), hex::encode(digest)))
}

struct RefreshHandle {
    cache_name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns every refresh task of a registry.
pub struct RefreshScheduler {
    tasks: DashMap<String, RefreshHandle>,
    root: CancellationToken,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            root: CancellationToken::new(),
        }
    }

    /// Start a refresh loop for `key` unless `identity` already has one.
    ///
    /// Returns `false` when the identity is taken, the scheduler is shut
    /// down, or the cache's descriptor is not eligible for refresh.
    pub fn register(
        &self,
        identity: impl Into<String>,
        key: impl Into<String>,
        recompute: Recompute,
        cache: Arc<TieredCache>,
    ) -> bool {
        let identity = identity.into();
        let descriptor = cache.descriptor();

        if !descriptor.is_refresh_eligible() {
            tracing::debug!(
                cache = %descriptor.name,
                ttl = descriptor.ttl_seconds,
                trigger = descriptor.refresh_trigger_seconds,
                sleep = descriptor.refresher_sleep_seconds,
                "cache not eligible for refresh"
            );
            return false;
        }
        if self.root.is_cancelled() {
            return false;
        }

        match self.tasks.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let token = self.root.child_token();
                let cache_name = descriptor.name.to_lowercase();
                let handle = tokio::spawn(run(
                    slot.key().clone(),
                    key.into(),
                    recompute,
                    cache,
                    token.clone(),
                ));
                tracing::info!(identity = %slot.key(), "refresh task registered");
                slot.insert(RefreshHandle {
                    cache_name,
                    token,
                    handle,
                });
                true
            }
        }
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        self.tasks.contains_key(identity)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop one task.
    pub fn cancel(&self, identity: &str) -> bool {
        match self.tasks.remove(identity) {
            Some((_, task)) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every task refreshing the named cache. Returns how many stopped.
    pub fn cancel_cache(&self, cache_name: &str) -> usize {
        let cache_name = cache_name.to_lowercase();
        let mut cancelled = 0;
        self.tasks.retain(|_, task| {
            if task.cache_name == cache_name {
                task.token.cancel();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            tracing::info!(cache = %cache_name, cancelled, "refresh tasks cancelled");
        }
        cancelled
    }

    /// Stop every task and refuse new registrations.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.tasks.clear();
    }

    /// Stop every task and wait for the loops to exit.
    pub async fn shutdown_and_wait(&self) {
        self.root.cancel();
        let identities: Vec<String> = self.tasks.iter().map(|t| t.key().clone()).collect();
        for identity in identities {
            if let Some((_, task)) = self.tasks.remove(&identity)
                && let Err(e) = task.handle.await
            {
                tracing::warn!(identity = %identity, error = %e, "refresh task ended abnormally");
            }
        }
    }
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run(
    identity: String,
    key: String,
    recompute: Recompute,
    cache: Arc<TieredCache>,
    token: CancellationToken,
) {
    let sleep: Duration = cache.descriptor().refresher_sleep();
    let trigger: Duration = cache.descriptor().refresh_trigger();
    let mut elapsed = Duration::ZERO;

    loop {
        let started = Instant::now();
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(sleep) => {}
        }
        elapsed += started.elapsed();
        if elapsed < trigger {
            continue;
        }

        match recompute().await {
            Ok(value) => match cache.put(&key, value).await {
                Ok(()) => tracing::debug!(identity = %identity, key = %key, "entry refreshed"),
                Err(e) => tracing::warn!(
                    identity = %identity,
                    key = %key,
                    error = %e,
                    "refresh write failed"
                ),
            },
            Err(e) => tracing::warn!(
                identity = %identity,
                key = %key,
                error = %e,
                "recompute failed, keeping stale value"
            ),
        }
        elapsed = Duration::ZERO;
    }

    tracing::debug!(identity = %identity, "refresh task stopped");
}
