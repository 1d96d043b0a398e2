use std::time::Duration;

use deadpool_redis::{Pool, PoolConfig, Runtime};

use crate::config::RedisConfig;
use crate::error::RedisError;

/// Build a connection pool and check that Redis answers.
///
/// Pool size and timeouts come from `config`. Fails when the pool cannot be
/// created or no connection can be checked out within the timeout.
pub async fn connect(config: &RedisConfig) -> Result<Pool, RedisError> {
    let timeout = Duration::from_millis(config.timeout_ms);

    let mut pool_config = PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RedisError::Pool(e.to_string()))?;

    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    tracing::info!(url = %config.url, pool_size = config.pool_size, "Connected to Redis");
    Ok(pool)
}
