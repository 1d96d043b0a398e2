//! Error types for cache operations.

/// Errors surfaced by the cache core.
///
/// Configuration and transport failures are mostly logged and contained;
/// remote tier and loader failures propagate to the caller of a synchronous
/// cache operation.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Remote tier error: {0}")]
    Remote(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error returned by a caller-supplied loader.
    #[error(transparent)]
    Loader(#[from] anyhow::Error),
}

impl CacheError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
