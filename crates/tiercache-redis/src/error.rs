use tiercache_core::CacheError;

/// Errors from the Redis backends.
#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Redis publish error: {0}")]
    Publish(String),
}

impl From<redis::RedisError> for RedisError {
    fn from(e: redis::RedisError) -> Self {
        Self::Command(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for RedisError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Pool(e.to_string())
    }
}

impl From<RedisError> for CacheError {
    fn from(e: RedisError) -> Self {
        match e {
            RedisError::Subscribe(_) | RedisError::Publish(_) => {
                CacheError::transport(e.to_string())
            }
            _ => CacheError::remote(e.to_string()),
        }
    }
}
