//! Redis backends for tiercache.
//!
//! - [`RedisRemoteTier`]: remote tier with keys namespaced per cache
//!   (`<cache_name>::<key>`), written with `SET EX`.
//! - [`RedisTransport`]: invalidation transport using `PUBLISH` through a
//!   pooled connection and `SUBSCRIBE` on a dedicated connection that
//!   reconnects with exponential backoff.
//!
//! Both share one `deadpool-redis` pool built by [`connect`].

mod config;
mod error;
mod pool;
mod remote;
mod transport;

pub use config::RedisConfig;
pub use error::RedisError;
pub use pool::connect;
pub use remote::{RedisRemoteFactory, RedisRemoteTier};
pub use transport::RedisTransport;
