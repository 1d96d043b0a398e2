//! Two-tier caching core with cross-process invalidation.
//!
//! ## Architecture
//!
//! - **Local tier (moka)**: In-memory, bounded, TTL-based, per-process
//! - **Remote tier**: Shared key/value store with TTL, the source of truth
//! - **Invalidation bus**: Pub/sub channel that tells every process to drop
//!   its local copy after a write
//! - **Refresh scheduler**: Per-key background loops that recompute hot
//!   entries before they expire
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get(key) → Local tier → Remote tier → loader
//!                ↑             │
//!                └─ backfill ──┘
//!
//! put(key) → Remote tier → publish Evict(key) → every process drops key locally
//! ```
//!
//! ## Cache Names
//!
//! Caches are either declared up front or materialized on first use from an
//! encoded name such as `users_600_360_30#lr` (see [`naming`]).

pub mod bus;
pub mod descriptor;
pub mod error;
pub mod message;
pub mod naming;
pub mod refresh;
pub mod registry;
pub mod tier;
pub mod tiered;
pub mod transport;

pub use bus::{DEFAULT_CHANNEL, InvalidationBus};
pub use descriptor::CacheDescriptor;
pub use error::{CacheError, Result};
pub use message::{InvalidationMessage, InvalidationOp};
pub use naming::TierLayout;
pub use refresh::{Recompute, RefreshScheduler, recompute, refresh_identity};
pub use registry::{CacheDeclarations, CacheRegistry, LocalTierSettings};
pub use tier::{
    CacheValue, LocalTier, MemoryRemoteFactory, MemoryRemoteStore, MemoryRemoteTier,
    MokaLocalTier, RemoteTier, RemoteTierFactory,
};
pub use tiered::{CacheStats, TieredCache, TieredCacheMode};
pub use transport::{LocalTransport, PayloadStream, PubSubTransport};
