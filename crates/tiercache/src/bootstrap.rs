//! Wiring of tiers, transport, registry and listener from configuration.

use std::sync::Arc;

use tiercache_core::{
    CacheRegistry, InvalidationBus, LocalTransport, PubSubTransport, RemoteTierFactory,
    TieredCache,
};
use tiercache_redis::{RedisConfig, RedisRemoteFactory, RedisTransport};
use tokio::task::JoinHandle;

use crate::config::AppConfig;

/// A running cache system.
///
/// ## Modes
///
/// - **Distributed**: Redis remote tier + Redis pub/sub invalidation
/// - **Local**: moka local tiers only, in-process invalidation. Used when
///   Redis is disabled or unreachable at startup.
pub struct CacheSystem {
    registry: Arc<CacheRegistry>,
    listener: Option<JoinHandle<()>>,
}

impl CacheSystem {
    /// Start from configuration. Never fails: Redis problems fall back to
    /// local mode with a warning.
    pub async fn start(config: &AppConfig) -> Self {
        match connect_redis(&config.redis).await {
            Some((transport, factory)) => {
                Self::with_backends(config, transport, Some(factory)).await
            }
            None => {
                let transport: Arc<dyn PubSubTransport> = Arc::new(LocalTransport::new());
                Self::with_backends(config, transport, None).await
            }
        }
    }

    /// Start with explicit backends.
    pub async fn with_backends(
        config: &AppConfig,
        transport: Arc<dyn PubSubTransport>,
        remote_factory: Option<Arc<dyn RemoteTierFactory>>,
    ) -> Self {
        let bus = InvalidationBus::new(transport, config.cache.channel.clone());
        let registry = Arc::new(
            CacheRegistry::new(bus, remote_factory)
                .with_local_settings(config.cache.local_tier_settings()),
        );
        registry.register_declarations(&config.cache.declarations());

        let listener = match registry.start_listener().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Invalidation listener not started; local tiers rely on TTL expiry"
                );
                None
            }
        };

        tracing::info!(
            distributed = registry.is_distributed(),
            caches = registry.len(),
            channel = %config.cache.channel,
            "Cache system started"
        );

        Self { registry, listener }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn get_cache(&self, name: &str) -> Option<Arc<TieredCache>> {
        self.registry.get_cache(name)
    }

    /// Whether caches are backed by a remote tier.
    pub fn is_distributed(&self) -> bool {
        self.registry.is_distributed()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop refresh tasks and the listener, waiting for the listener to exit.
    pub async fn shutdown(&mut self) {
        self.registry.shutdown();
        if let Some(handle) = self.listener.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Invalidation listener ended abnormally");
        }
        tracing::info!("Cache system stopped");
    }
}

async fn connect_redis(
    config: &RedisConfig,
) -> Option<(Arc<dyn PubSubTransport>, Arc<dyn RemoteTierFactory>)> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local caches only");
        return None;
    }

    tracing::info!(url = %config.url, "Connecting to Redis");
    let pool = match tiercache_redis::connect(config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local caches."
            );
            return None;
        }
    };

    let transport = match RedisTransport::new(pool.clone(), &config.url) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis transport. Falling back to local caches."
            );
            return None;
        }
    };

    let transport: Arc<dyn PubSubTransport> = Arc::new(transport);
    let factory: Arc<dyn RemoteTierFactory> = Arc::new(RedisRemoteFactory::new(pool));
    Some((transport, factory))
}
