//! Tiered caching with cross-process invalidation, configured from TOML and
//! environment variables.
//!
//! ```ignore
//! tiercache::config::load_dotenv();
//! let config = tiercache::config::loader::load_config(None)?;
//! tiercache::observability::init_tracing(&config.logging);
//!
//! let system = tiercache::CacheSystem::start(&config).await;
//! let users = system.get_cache("users_600_360_30#lr").expect("valid name");
//! let profile = users.get_with("42", || async { load_profile(42).await }).await?;
//! ```

pub mod bootstrap;
pub mod config;
pub mod observability;

pub use bootstrap::CacheSystem;
pub use config::AppConfig;
pub use tiercache_core::{
    CacheDescriptor, CacheError, CacheRegistry, CacheStats, CacheValue, Recompute, Result,
    TieredCache, TieredCacheMode, recompute,
};
pub use tiercache_redis::RedisConfig;
