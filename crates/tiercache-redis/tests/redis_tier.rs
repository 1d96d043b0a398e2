//! Integration tests for the Redis remote tier and transport.
//!
//! Tests use testcontainers to spin up a real Redis instance.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache_core::{
    CacheDeclarations, CacheDescriptor, CacheRegistry, InvalidationBus, LocalTier, PubSubTransport,
    RemoteTier, RemoteTierFactory, TieredCacheMode,
};
use tiercache_redis::{RedisConfig, RedisRemoteFactory, RedisRemoteTier, RedisTransport, connect};
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn pool() -> (deadpool_redis::Pool, String) {
    let url = get_redis_url().await;
    let pool = connect(&RedisConfig::with_url(&url)).await.expect("connect");
    (pool, url)
}

fn value(bytes: &[u8]) -> Arc<Vec<u8>> {
    Arc::new(bytes.to_vec())
}

#[tokio::test]
async fn test_connect_fails_for_unreachable_server() {
    let config = RedisConfig {
        timeout_ms: 200,
        ..RedisConfig::with_url("redis://127.0.0.1:1")
    };
    assert!(connect(&config).await.is_err());
}

#[tokio::test]
async fn test_remote_tier_get_put_evict() {
    let (pool, _) = pool().await;
    let tier = RedisRemoteTier::new(pool, "it_basic#r");
    let ttl = Duration::from_secs(60);

    assert!(tier.get("k").await.unwrap().is_none());
    tier.put("k", value(b"v"), ttl).await.unwrap();
    assert_eq!(tier.get("k").await.unwrap(), Some(value(b"v")));

    assert!(tier.evict("k").await.unwrap());
    assert!(!tier.evict("k").await.unwrap());
    assert!(tier.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn test_remote_tier_put_if_absent() {
    let (pool, _) = pool().await;
    let tier = RedisRemoteTier::new(pool, "it_cas#r");
    let ttl = Duration::from_secs(60);

    assert_eq!(tier.put_if_absent("k", value(b"a"), ttl).await.unwrap(), None);
    assert_eq!(
        tier.put_if_absent("k", value(b"b"), ttl).await.unwrap(),
        Some(value(b"a"))
    );
    assert_eq!(tier.get("k").await.unwrap(), Some(value(b"a")));
}

#[tokio::test]
async fn test_remote_tier_ttl_expires() {
    let (pool, _) = pool().await;
    let tier = RedisRemoteTier::new(pool, "it_ttl#r");

    tier.put("k", value(b"v"), Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(tier.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_only_touches_own_namespace() {
    let (pool, _) = pool().await;
    let ttl = Duration::from_secs(60);
    let orders = RedisRemoteTier::new(pool.clone(), "it_orders#r");
    let users = RedisRemoteTier::new(pool, "it_users#r");

    for i in 0..1200 {
        orders.put(&format!("o{i}"), value(b"x"), ttl).await.unwrap();
    }
    users.put("u1", value(b"y"), ttl).await.unwrap();

    orders.clear().await.unwrap();

    assert!(orders.get("o0").await.unwrap().is_none());
    assert!(orders.get("o1199").await.unwrap().is_none());
    assert_eq!(users.get("u1").await.unwrap(), Some(value(b"y")));
}

#[tokio::test]
async fn test_transport_publish_subscribe() {
    let (pool, url) = pool().await;
    let transport = RedisTransport::new(pool, &url).expect("transport");

    let mut stream = transport.subscribe("it:channel").await.unwrap();
    transport.publish("it:channel", b"hello".to_vec()).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("message within timeout");
    assert_eq!(received, Some(b"hello".to_vec()));
}

#[tokio::test]
async fn test_two_registries_over_redis() {
    let (pool, url) = pool().await;
    let declarations = CacheDeclarations {
        tiered: vec![CacheDescriptor::new("it_catalog#lr").with_ttl_seconds(60)],
        ..Default::default()
    };

    let mut nodes = Vec::new();
    for _ in 0..2 {
        let transport = Arc::new(RedisTransport::new(pool.clone(), &url).expect("transport"));
        let bus = InvalidationBus::new(transport, "it:invalidation");
        let factory: Arc<dyn RemoteTierFactory> = Arc::new(RedisRemoteFactory::new(pool.clone()));
        let registry = Arc::new(CacheRegistry::new(bus, Some(factory)));
        registry.register_declarations(&declarations);
        let listener = registry.start_listener().await.expect("listener");
        nodes.push((registry, listener));
    }

    let cache_a = nodes[0].0.get_cache("it_catalog#lr").unwrap();
    let cache_b = nodes[1].0.get_cache("it_catalog#lr").unwrap();
    assert_eq!(cache_a.mode(), TieredCacheMode::Tiered);

    cache_a.put("sku", b"1".to_vec()).await.unwrap();
    assert_eq!(cache_b.get("sku").await.unwrap(), Some(value(b"1")));

    cache_a.put("sku", b"2".to_vec()).await.unwrap();

    let local_b = Arc::clone(cache_b.local_tier().unwrap());
    tokio::time::timeout(Duration::from_secs(5), async {
        while local_b.get("sku").await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer local copy invalidated");

    assert_eq!(cache_b.get("sku").await.unwrap(), Some(value(b"2")));

    for (registry, _) in &nodes {
        registry.shutdown();
    }
}
